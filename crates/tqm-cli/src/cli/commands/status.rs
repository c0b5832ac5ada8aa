//! `tqm status` – show the active transfer and the queue.

use std::path::Path;

use anyhow::{Context, Result};
use tqm_core::api::Request;
use tqm_core::scheduler::StatusSnapshot;

use crate::cli::control_socket;

pub async fn run_status(socket: &Path, json: bool) -> Result<()> {
    let resp = control_socket::call(socket, &Request::Status).await?;
    let status = resp.status.context("server sent no status")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render(&status));
    }
    Ok(())
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

fn render(s: &StatusSnapshot) -> String {
    let mut out = String::new();
    match &s.current {
        Some(c) => {
            let state = if s.is_processing {
                "processing".to_string()
            } else {
                c.status.as_str().to_string()
            };
            out.push_str(&format!("{} [{}] {}\n", c.alias, state, c.hash));
            if let Some(name) = &c.filename {
                out.push_str(&format!("  file:  {}\n", name));
            }
            let total = if c.bytes_total > 0 {
                format!("{:.1} MiB", mib(c.bytes_total))
            } else {
                "?".to_string()
            };
            out.push_str(&format!(
                "  {:.1} / {} ({:.1}%)  {:.2} MiB/s",
                mib(c.bytes_done),
                total,
                c.percent,
                mib(s.speed)
            ));
            if let Some(eta) = s.remaining_time {
                out.push_str(&format!("  ETA {:.0}s", eta));
            }
            out.push('\n');
        }
        None => out.push_str("No active transfer.\n"),
    }
    if let Some(limit) = s.speed_limit {
        out.push_str(&format!("Speed limit: {} B/s\n", limit));
    }
    if s.queue.is_empty() {
        out.push_str("Queue is empty.\n");
    } else {
        out.push_str(&format!("{:<4} {:<34} {}\n", "POS", "HASH", "ALIAS"));
        for (i, e) in s.queue.iter().enumerate() {
            out.push_str(&format!("{:<4} {:<34} {}\n", i, e.hash, e.alias));
        }
    }
    out
}
