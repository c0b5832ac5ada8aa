//! `tqm add <url>` – append a source to the queue.

use std::path::Path;

use anyhow::Result;
use tqm_core::api::Request;

use crate::cli::control_socket;

pub async fn run_add(socket: &Path, url: String, alias: Option<String>) -> Result<()> {
    let resp = control_socket::call(socket, &Request::Enqueue { url, alias }).await?;
    println!("Queued {}", resp.hash.unwrap_or_default());
    Ok(())
}
