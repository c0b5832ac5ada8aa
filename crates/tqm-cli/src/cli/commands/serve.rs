//! `tqm serve` – run the scheduler and the control socket in this process.

use std::path::Path;

use anyhow::Result;
use tqm_core::config::TqmConfig;
use tqm_core::queue_db::QueueDb;
use tqm_core::scheduler::{self, SchedulerParts};

use crate::cli::control_socket;

pub async fn run_serve(cfg: &TqmConfig, socket: &Path) -> Result<()> {
    let db = if cfg.persist_queue {
        Some(QueueDb::open_default().await?)
    } else {
        None
    };
    let parts = SchedulerParts::from_config(cfg, db)?;
    let (handle, mut task) = scheduler::spawn(parts);
    let listener = control_socket::spawn_control_listener(handle.clone(), socket)?;
    println!("tqm serving on {}", socket.display());

    let interrupted = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            true
        }
        // `tqm shutdown` stopped the scheduler through the socket.
        res = &mut task => {
            res?;
            false
        }
    };
    if interrupted {
        tracing::info!("interrupt received, shutting down");
        handle.shutdown().await?;
        task.await?;
    }

    listener.abort();
    let _ = std::fs::remove_file(socket);
    println!("Stopped.");
    Ok(())
}
