use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_YTDLP: &str = "yt-dlp";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level config file, shared read-only by every watcher.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub ffmpeg_path: Option<String>,
    pub ytdlp_path: Option<String>,
    /// Re-encode (H.264/AAC) while capturing instead of stream copying.
    #[serde(default)]
    pub encode_while_downloading: bool,
    pub watchers: Vec<WatcherConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalUnit {
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// One watched channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    pub channel: String,
    pub poll_interval_qty: u64,
    pub poll_interval_unit: IntervalUnit,
    pub output_path: Option<String>,
    pub output_filename_prefix: Option<String>,
    #[serde(default, rename = "keepMKVFiles")]
    pub keep_mkv_files: bool,
    #[serde(default)]
    pub log_ffmpeg_output: bool,
    #[serde(default = "default_true")]
    pub log_to_file: bool,
}

fn default_true() -> bool {
    true
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl IntervalUnit {
    pub fn duration(&self, qty: u64) -> Duration {
        match self {
            IntervalUnit::Millis => Duration::from_millis(qty),
            IntervalUnit::Seconds => Duration::from_secs(qty),
            IntervalUnit::Minutes => Duration::from_secs(qty.saturating_mul(60)),
            IntervalUnit::Hours => Duration::from_secs(qty.saturating_mul(3600)),
            IntervalUnit::Days => Duration::from_secs(qty.saturating_mul(86400)),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.watchers.is_empty() {
            return Err(ConfigError::Invalid("no watchers configured".into()));
        }

        let mut seen = HashSet::new();
        let mut dirs = HashSet::new();
        for watcher in &self.watchers {
            if watcher.channel.trim().is_empty() {
                return Err(ConfigError::Invalid("watcher with empty channel".into()));
            }
            if watcher.poll_interval_qty == 0 {
                return Err(ConfigError::Invalid(format!(
                    "watcher {} has a zero poll interval",
                    watcher.channel
                )));
            }
            if !seen.insert(watcher.channel.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "channel {} is watched more than once",
                    watcher.channel
                )));
            }
            // Conversion jobs are only serialized per watcher.
            let dir = watcher.output_dir().components().collect::<PathBuf>();
            if !dirs.insert(dir) {
                return Err(ConfigError::Invalid(format!(
                    "output directory of {} is shared with another watcher",
                    watcher.channel
                )));
            }
        }

        Ok(())
    }

    pub fn ffmpeg(&self) -> &str {
        non_empty(&self.ffmpeg_path).unwrap_or(DEFAULT_FFMPEG)
    }

    pub fn ytdlp(&self) -> &str {
        non_empty(&self.ytdlp_path).unwrap_or(DEFAULT_YTDLP)
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_unit.duration(self.poll_interval_qty)
    }

    /// Falls back to `out/<channel>` when no output path is configured.
    pub fn output_dir(&self) -> PathBuf {
        match non_empty(&self.output_path) {
            Some(path) => PathBuf::from(path),
            None => Path::new("out").join(&self.channel),
        }
    }

    pub fn filename_prefix(&self) -> &str {
        non_empty(&self.output_filename_prefix).unwrap_or(&self.channel)
    }

    /// Page handed to the resolver tool.
    pub fn live_page_url(&self) -> String {
        format!("https://www.tiktok.com/@{}/live", self.channel)
    }
}
