//! Persistent queue (SQLite via sqlx).
//!
//! The scheduler writes the whole queue after every committed mutation and
//! reads it back once at startup, so transfers survive a restart.

mod db;

pub use db::QueueDb;

#[cfg(test)]
pub(crate) use db::open_memory;
