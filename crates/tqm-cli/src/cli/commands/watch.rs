//! `tqm watch` – print push events as they arrive.

use std::path::Path;

use anyhow::Result;
use tqm_core::events::Event;

use crate::cli::control_socket::ControlClient;

pub async fn run_watch(socket: &Path) -> Result<()> {
    let mut client = ControlClient::connect(socket).await?;
    client.subscribe().await?;
    while let Some(event) = client.next_event().await? {
        match event {
            Event::Status { text } => println!("status: {text}"),
            Event::Progress { percent } => println!("progress: {percent:.1}%"),
            Event::Meta {
                filename,
                total_size,
            } => {
                let size = total_size
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown size".to_string());
                println!("file: {filename} ({size})");
            }
            Event::Complete { message } => println!("complete: {message}"),
            Event::Error { message } => println!("error: {message}"),
        }
    }
    println!("Server closed the event stream.");
    Ok(())
}
