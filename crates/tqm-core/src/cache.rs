//! On-disk artifact store keyed by transfer hash.
//!
//! A transfer's partial download lives at `<cache_dir>/<hash>.part`. Anything
//! else whose name starts with the hash (e.g. an extraction scratch dir)
//! belongs to the same transfer and goes away with it.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// Suffix of an in-progress artifact.
pub const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open (and create if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partial_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}{}", hash, PART_SUFFIX))
    }

    /// Confirmed bytes of the partial artifact; 0 when it does not exist.
    pub fn partial_len(&self, hash: &str) -> u64 {
        fs::metadata(self.partial_path(hash))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Delete every cache entry belonging to `hash`. Returns how many went.
    pub fn remove_artifacts(&self, hash: &str) -> io::Result<usize> {
        self.remove_matching(|name| name.starts_with(hash))
    }

    /// Delete every cache entry except those of `keep` (the active transfer).
    pub fn clean(&self, keep: Option<&str>) -> io::Result<usize> {
        self.remove_matching(|name| keep.map_or(true, |k| !name.starts_with(k)))
    }

    fn remove_matching(&self, pred: impl Fn(&str) -> bool) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !pred(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            let res = if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match res {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), "cache remove failed: {}", e),
            }
        }
        Ok(removed)
    }

    /// Fail with `Capacity` when the cache filesystem cannot hold `needed` more bytes.
    pub fn ensure_capacity(&self, needed: u64) -> Result<(), TransferError> {
        let available = match free_space(&self.dir) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("free space query failed, skipping check: {}", e);
                return Ok(());
            }
        };
        if needed > available {
            return Err(TransferError::capacity(needed, available));
        }
        Ok(())
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
pub fn free_space(path: &Path) -> io::Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_len_missing_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("c")).unwrap();
        assert!(cache.dir().exists());
        assert_eq!(cache.partial_len("abc"), 0);
        fs::write(cache.partial_path("abc"), b"12345").unwrap();
        assert_eq!(cache.partial_len("abc"), 5);
    }

    #[test]
    fn remove_artifacts_only_touches_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        fs::write(cache.partial_path("aaa"), b"x").unwrap();
        fs::create_dir(dir.path().join("aaa.extract")).unwrap();
        fs::write(dir.path().join("aaa.extract").join("inner"), b"y").unwrap();
        fs::write(cache.partial_path("bbb"), b"z").unwrap();

        assert_eq!(cache.remove_artifacts("aaa").unwrap(), 2);
        assert!(!cache.partial_path("aaa").exists());
        assert!(cache.partial_path("bbb").exists());
    }

    #[test]
    fn clean_keeps_active_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        for h in ["aaa", "bbb", "ccc"] {
            fs::write(cache.partial_path(h), b"x").unwrap();
        }
        assert_eq!(cache.clean(Some("bbb")).unwrap(), 2);
        assert!(cache.partial_path("bbb").exists());
        assert_eq!(cache.clean(None).unwrap(), 1);
        assert_eq!(cache.clean(None).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn capacity_check() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        assert!(cache.ensure_capacity(1).is_ok());
        assert!(matches!(
            cache.ensure_capacity(u64::MAX),
            Err(TransferError::Capacity(_))
        ));
    }
}
