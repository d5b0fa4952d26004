use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    config::{AppConfig, WatcherConfig},
    ffmpeg,
};

/// Marker appended to intermediates that were kept after conversion.
pub const CONVERTED_MARKER: &str = "-converted";

/// Time given to the OS to release ffmpeg's handle on the input file.
const RELEASE_GRACE: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("ffmpeg error: {0}")]
    FfmpegError(#[from] ffmpeg::FfmpegError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Remuxes finished `.mkv` captures in one directory to `.mp4`, repairing
/// whatever an interrupted earlier run left behind.
///
/// Runs over the same job are serialized, so the startup repair and a
/// post-recording repair never touch the directory at the same time.
pub struct ConversionJob {
    ffmpeg: String,
    dir: PathBuf,
    keep_intermediate: bool,
    grace: Duration,
    target: String,
    lock: Mutex<()>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// An intermediate that has not been converted yet.
pub fn is_pending(name: &str) -> bool {
    let suffix = format!(".{}", ffmpeg::INTERMEDIATE_EXT);
    name.ends_with(&suffix) && !name.ends_with(&format!("{}{}", CONVERTED_MARKER, suffix))
}

pub fn final_path(intermediate: &Path) -> PathBuf {
    intermediate.with_extension(ffmpeg::FINAL_EXT)
}

pub fn converted_path(intermediate: &Path) -> PathBuf {
    let stem = intermediate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    intermediate.with_file_name(format!(
        "{}{}.{}",
        stem,
        CONVERTED_MARKER,
        ffmpeg::INTERMEDIATE_EXT
    ))
}

impl ConversionJob {
    pub fn new(app: &AppConfig, watcher: &WatcherConfig, target: &str) -> Self {
        Self {
            ffmpeg: app.ffmpeg().to_string(),
            dir: watcher.output_dir(),
            keep_intermediate: watcher.keep_mkv_files,
            grace: RELEASE_GRACE,
            target: target.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn pending(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut pending = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if is_pending(&file_name(&path)) {
                pending.push(path);
            }
        }

        pending.sort();
        Ok(pending)
    }

    /// Converts every pending intermediate. A failure on one file is logged
    /// and leaves that file for the next run; only failing to list the
    /// directory fails the whole run.
    pub async fn run(&self) -> Result<ConversionReport, ConvertError> {
        let _guard = self.lock.lock().await;
        let mut report = ConversionReport::default();

        for path in self.pending().await? {
            match self.convert(&path).await {
                Ok(output) => {
                    info!(target: self.target.as_str(), "Converted {} to {}", path.display(), output.display());
                    report.converted.push(output);
                }
                Err(e) => {
                    error!(target: self.target.as_str(), "Could not convert {}: {}", path.display(), e);
                    report.failed.push(path);
                }
            }
        }

        Ok(report)
    }

    async fn convert(&self, path: &Path) -> Result<PathBuf, ConvertError> {
        let output = final_path(path);

        // An mp4 next to an unconverted mkv is from a run that never finished.
        if tokio::fs::try_exists(&output).await? {
            warn!(target: self.target.as_str(), "Removing incomplete conversion {}", output.display());
            tokio::fs::remove_file(&output).await?;
        }

        ffmpeg::remux(&self.ffmpeg, path, &output).await?;
        tokio::time::sleep(self.grace).await;

        if self.keep_intermediate {
            tokio::fs::rename(path, converted_path(path)).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }

        Ok(output)
    }
}
