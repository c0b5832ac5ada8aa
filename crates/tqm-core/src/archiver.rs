//! Post-download finalisation: move the artifact into place or extract it.
//!
//! Any failure here is `TransferError::Archive`, terminal on first
//! occurrence. The downloaded artifact is never deleted on failure.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::ArchiveConfig;
use crate::control::WorkerControl;
use crate::error::TransferError;
use crate::storage::{move_file, unique_destination};

pub trait Archiver: Send + Sync {
    /// Finalise the complete artifact at `artifact`, saved as `filename`.
    /// Returns the path of the result (file or extraction directory).
    fn finalize(
        &self,
        artifact: &Path,
        filename: &str,
        control: &WorkerControl,
    ) -> Result<PathBuf, TransferError>;
}

/// Moves the artifact into the download directory unchanged.
#[derive(Debug, Clone)]
pub struct MoveArchiver {
    pub download_dir: PathBuf,
}

impl MoveArchiver {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }
}

impl Archiver for MoveArchiver {
    fn finalize(
        &self,
        artifact: &Path,
        filename: &str,
        _control: &WorkerControl,
    ) -> Result<PathBuf, TransferError> {
        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| TransferError::Archive(format!("create {}: {}", self.download_dir.display(), e)))?;
        let dest = unique_destination(&self.download_dir, filename);
        move_file(artifact, &dest)
            .map_err(|e| TransferError::Archive(format!("move to {}: {}", dest.display(), e)))?;
        Ok(dest)
    }
}

/// Runs an external extraction program for matching extensions; everything
/// else is moved like `MoveArchiver`.
#[derive(Debug, Clone)]
pub struct CommandArchiver {
    config: ArchiveConfig,
    fallback: MoveArchiver,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl CommandArchiver {
    pub fn new(config: ArchiveConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            fallback: MoveArchiver::new(download_dir),
        }
    }

    fn handles(&self, filename: &str) -> bool {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }

    fn extract(
        &self,
        artifact: &Path,
        dest: &Path,
        control: &WorkerControl,
    ) -> Result<(), TransferError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(artifact)
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransferError::Archive(format!("run {}: {}", self.config.program, e)))?;

        // Stderr is drained on a side thread; a full pipe blocks the child.
        let stderr = child.stderr.take();
        let reader = std::thread::spawn(move || {
            let mut out = String::new();
            if let Some(mut s) = stderr {
                let _ = s.read_to_string(&mut out);
            }
            out
        });

        let status = loop {
            if control.stop_reason().is_some() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransferError::Stopped);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(TransferError::Archive(format!("wait {}: {}", self.config.program, e))),
            }
        };
        let stderr = reader.join().unwrap_or_default();

        if !status.success() {
            let tail = stderr.trim().lines().last().unwrap_or("").to_string();
            return Err(TransferError::Archive(format!(
                "{} exited with {}{}",
                self.config.program,
                status,
                if tail.is_empty() { String::new() } else { format!(": {}", tail) }
            )));
        }
        Ok(())
    }
}

impl Archiver for CommandArchiver {
    fn finalize(
        &self,
        artifact: &Path,
        filename: &str,
        control: &WorkerControl,
    ) -> Result<PathBuf, TransferError> {
        if !self.handles(filename) {
            return self.fallback.finalize(artifact, filename, control);
        }
        let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
        let dest = unique_destination(&self.fallback.download_dir, stem);
        std::fs::create_dir_all(&dest)
            .map_err(|e| TransferError::Archive(format!("create {}: {}", dest.display(), e)))?;

        tracing::info!(artifact = %artifact.display(), dest = %dest.display(), "extracting");
        if let Err(e) = self.extract(artifact, &dest, control) {
            // Leave the artifact; only the empty/partial output dir goes.
            let _ = std::fs::remove_dir_all(&dest);
            return Err(e);
        }
        if let Err(e) = std::fs::remove_file(artifact) {
            tracing::warn!(artifact = %artifact.display(), "remove extracted archive failed: {}", e);
        }
        Ok(dest)
    }
}
