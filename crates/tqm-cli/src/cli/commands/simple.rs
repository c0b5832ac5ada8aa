//! Commands that send one request and print a confirmation.

use std::path::Path;

use anyhow::Result;
use tqm_core::api::Request;

use crate::cli::control_socket;

pub async fn run_simple(socket: &Path, req: Request, done: &str) -> Result<()> {
    control_socket::call(socket, &req).await?;
    println!("{done}");
    Ok(())
}
