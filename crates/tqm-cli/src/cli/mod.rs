//! CLI for the TQM transfer queue manager.
//!
//! `serve` runs the scheduler in this process; every other subcommand is a
//! client of the control socket `serve` listens on.

mod commands;
pub mod control_socket;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tqm_core::api::Request;
use tqm_core::config;

use commands::{run_add, run_serve, run_simple, run_status, run_watch};

/// Top-level CLI for the TQM transfer queue manager.
#[derive(Debug, Parser)]
#[command(name = "tqm")]
#[command(about = "TQM: single-active-job transfer queue manager", long_about = None)]
pub struct Cli {
    /// Control socket path (default: $XDG_STATE_HOME/tqm/control.sock).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the scheduler and serve the control socket until interrupted.
    Serve,

    /// Add a source to the end of the queue.
    Add {
        /// Source URL (http, https or file).
        url: String,
        /// Display title; derived from the URL when omitted.
        #[arg(long)]
        alias: Option<String>,
    },

    /// Show the active transfer and the queue.
    Status {
        /// Print the raw status snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Pause the active transfer.
    Pause,

    /// Resume the paused transfer.
    Resume,

    /// Cancel the active transfer and delete its partial data.
    Cancel,

    /// Reorder the queue. Must list every queued hash exactly once.
    Reorder {
        #[arg(required = true, value_name = "HASH")]
        hashes: Vec<String>,
    },

    /// Remove a transfer from the queue (cancels it if active).
    Remove { hash: String },

    /// Start a queued transfer now, sending the active one back to the queue.
    Promote { hash: String },

    /// Send the active transfer back into the queue.
    Demote {
        /// Queue position to insert at (0 = head).
        #[arg(long, default_value = "0", value_name = "N")]
        position: usize,
    },

    /// Delete cached data of every transfer except the active one.
    CleanCache,

    /// Cap the transfer rate; 0 removes the cap.
    SpeedLimit {
        #[arg(value_name = "BYTES_PER_SEC")]
        bytes_per_sec: u64,
    },

    /// Stream push events until interrupted.
    Watch,

    /// Stop the server, keeping the active transfer's progress.
    Shutdown,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let socket = match cli.socket {
            Some(path) => path,
            None => tqm_core::control::default_control_socket_path()?,
        };

        match cli.command {
            CliCommand::Serve => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                run_serve(&cfg, &socket).await?;
            }
            CliCommand::Add { url, alias } => run_add(&socket, url, alias).await?,
            CliCommand::Status { json } => run_status(&socket, json).await?,
            CliCommand::Pause => run_simple(&socket, Request::Pause, "Paused").await?,
            CliCommand::Resume => run_simple(&socket, Request::Resume, "Resumed").await?,
            CliCommand::Cancel => run_simple(&socket, Request::Cancel, "Cancelled").await?,
            CliCommand::Reorder { hashes } => {
                run_simple(&socket, Request::Reorder { hashes }, "Queue reordered").await?
            }
            CliCommand::Remove { hash } => {
                run_simple(&socket, Request::Remove { hash }, "Removed").await?
            }
            CliCommand::Promote { hash } => {
                run_simple(&socket, Request::Promote { hash }, "Promoted").await?
            }
            CliCommand::Demote { position } => {
                run_simple(&socket, Request::Demote { position }, "Demoted").await?
            }
            CliCommand::CleanCache => {
                let resp = control_socket::call(&socket, &Request::CleanCache).await?;
                println!("Removed {} cache entries", resp.removed.unwrap_or(0));
            }
            CliCommand::SpeedLimit { bytes_per_sec } => {
                let req = Request::SetSpeedLimit {
                    bytes_per_sec: (bytes_per_sec > 0).then_some(bytes_per_sec),
                };
                let msg = if bytes_per_sec > 0 {
                    "Speed limit set"
                } else {
                    "Speed limit removed"
                };
                run_simple(&socket, req, msg).await?;
            }
            CliCommand::Watch => run_watch(&socket).await?,
            CliCommand::Shutdown => run_simple(&socket, Request::Shutdown, "Server stopped").await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
