//! Station configuration
//!
//! Read once at startup. Every field has a default, so a missing or partial
//! file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "STREAMCAP_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "streamcap.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    /// Where preferences are persisted
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// Recordings and screenshots are written here
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_video_bits_per_second")]
    pub video_bits_per_second: u64,

    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,

    /// `tracing` filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("streamcap-settings.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("captures")
}

fn default_video_bits_per_second() -> u64 {
    crate::recorder::encoder::DEFAULT_VIDEO_BITS_PER_SECOND
}

fn default_chunk_interval_ms() -> u64 {
    crate::recorder::encoder::DEFAULT_CHUNK_INTERVAL.as_millis() as u64
}

fn default_log_filter() -> String {
    "streamcap=debug".to_string()
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            output_dir: default_output_dir(),
            video_bits_per_second: default_video_bits_per_second(),
            chunk_interval_ms: default_chunk_interval_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl StationConfig {
    /// Load from `STREAMCAP_CONFIG` or `streamcap.json`; defaults on any failure
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    // logging is not up yet
                    eprintln!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }
}
