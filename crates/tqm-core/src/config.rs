use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per transfer run (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

/// External extraction tool used by `CommandArchiver`.
///
/// The archive path and the destination directory are appended to `args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Program to run, e.g. "unrar" or "7z".
    pub program: String,
    /// Arguments placed before the archive path, e.g. ["x", "-y"].
    #[serde(default)]
    pub args: Vec<String>,
    /// File extensions (without dot, lowercase) handed to the program.
    pub extensions: Vec<String>,
}

/// Global configuration loaded from `~/.config/tqm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TqmConfig {
    /// Where finished transfers are placed. Defaults to the XDG data dir.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Where partial artifacts live. Defaults to the XDG cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Optional bandwidth cap in bytes per second (None or 0 = no cap).
    #[serde(default)]
    pub max_bytes_per_sec: Option<u64>,
    /// How often the active transfer's counters are sampled.
    pub progress_interval_ms: u64,
    /// EMA weight of the newest speed sample, in (0, 1].
    pub speed_smoothing: f64,
    /// Per-listener buffer of the push channel. A full listener is dropped.
    pub event_buffer: usize,
    /// Persist the queue to SQLite so it survives restarts.
    pub persist_queue: bool,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional extraction tool; if missing, artifacts are moved as-is.
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
}

impl Default for TqmConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            cache_dir: None,
            max_bytes_per_sec: None,
            progress_interval_ms: 500,
            speed_smoothing: 0.3,
            event_buffer: 64,
            persist_queue: true,
            retry: None,
            archive: None,
        }
    }
}

impl TqmConfig {
    /// Configured download dir, or `~/.local/share/tqm/downloads`.
    pub fn resolved_download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("tqm")?;
        Ok(xdg_dirs.get_data_home().join("downloads"))
    }

    /// Configured cache dir, or `~/.cache/tqm/transfers`.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("tqm")?;
        Ok(xdg_dirs.get_cache_home().join("transfers"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tqm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<TqmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = TqmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: TqmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
