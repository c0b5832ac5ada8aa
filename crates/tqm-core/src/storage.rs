//! Partial artifact file lifecycle.
//!
//! The active transfer appends to `<cache>/<hash>.part` sequentially, so the
//! file length is always the last confirmed byte offset. Resume reopens the
//! same file at that length; finalize moves it to its destination.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// Sequential writer for a partial artifact.
pub struct ArtifactWriter {
    file: File,
    len: u64,
}

impl ArtifactWriter {
    /// Open `path` for writing at `offset`, creating it when missing.
    /// Anything past `offset` is discarded, so a server that ignored the
    /// Range request can be handled by reopening at 0.
    pub fn open_at(path: &Path, offset: u64) -> io::Result<Self> {
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let existing = file.metadata()?.len();
        let start = offset.min(existing);
        if existing != start {
            file.set_len(start)?;
        }
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            file,
            len: start,
        })
    }

    /// Truncate and continue writing from `offset` (must not exceed current length).
    pub fn rewind_to(&mut self, offset: u64) -> io::Result<()> {
        let start = offset.min(self.len);
        self.file.set_len(start)?;
        self.file.seek(SeekFrom::Start(start))?;
        self.len = start;
        Ok(())
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(data).map_err(TransferError::from_io)?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Bytes confirmed in the file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush file data to disk. Called before finalizing.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Move `from` to `to`. Falls back to copy + remove when a rename crosses
/// filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(from = %from.display(), to = %to.display(), "rename crosses devices, copying");
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

/// First path in `dir` named `name`, then `name (1)`, `name (2)`, ... that
/// does not exist yet.
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, Some(e)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(e) => dir.join(format!("{} ({}).{}", stem, n, e)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
