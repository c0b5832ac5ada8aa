//! CLI command handlers.

mod add;
mod serve;
mod simple;
mod status;
mod watch;

pub use add::run_add;
pub use serve::run_serve;
pub use simple::run_simple;
pub use status::run_status;
pub use watch::run_watch;
