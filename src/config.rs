// src/config.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the transport, the fetch loop and the save surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Extra request headers, typically `Cookie` or `Authorization`.
    pub headers: BTreeMap<String, String>,

    /// Persist and broadcast progress every this many attempted segments.
    pub progress_every: usize,
    /// Pause between two segment fetches.
    pub segment_delay_ms: u64,
    /// Upper bound on a single wait while paused.
    pub pause_poll_ms: u64,
    /// How many master playlists may be followed before giving up.
    pub max_playlist_depth: usize,
    /// Largest segment plan a DASH manifest may describe.
    pub max_segments: usize,
    /// 0 means unlimited.
    pub rate_limit_bytes_per_sec: u64,

    /// Delay before a saved chunk record is deleted.
    pub save_grace_secs: u64,
    pub database_path: PathBuf,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            headers: BTreeMap::new(),
            progress_every: 10,
            segment_delay_ms: 50,
            pause_poll_ms: 500,
            max_playlist_depth: 5,
            max_segments: 100_000,
            rate_limit_bytes_per_sec: 0,
            save_grace_secs: 5,
            database_path: PathBuf::from("streamsave.db"),
        }
    }
}

impl DownloaderConfig {
    /// Reads a JSON config file. Missing keys fall back to their defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn segment_delay(&self) -> Duration {
        Duration::from_millis(self.segment_delay_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    pub fn save_grace(&self) -> Duration {
        Duration::from_secs(self.save_grace_secs)
    }
}
