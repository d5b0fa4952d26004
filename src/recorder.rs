use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
};

use chrono::{DateTime, Local};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AppConfig, WatcherConfig},
    ffmpeg::{self, CaptureMode},
    util,
    ytdlp::{ResolveError, UrlResolver},
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("could not resolve recording url: {0}")]
    ResolveError(#[from] ResolveError),
    #[error("ffmpeg error: {0}")]
    FfmpegError(#[from] ffmpeg::FfmpegError),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("shutdown requested before the capture started")]
    Cancelled,
}

#[derive(Debug)]
pub enum RecordingOutcome {
    /// The stream ended and ffmpeg exited on its own.
    Finished { path: PathBuf, status: ExitStatus },
    /// Shutdown was requested and ffmpeg was asked to quit.
    Stopped { path: PathBuf, status: ExitStatus },
}

impl RecordingOutcome {
    pub fn path(&self) -> &Path {
        match self {
            RecordingOutcome::Finished { path, .. } | RecordingOutcome::Stopped { path, .. } => {
                path
            }
        }
    }
}

/// A capture in progress.
pub struct RecordingSession {
    pub path: PathBuf,
    pub started: DateTime<Local>,
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

/// Resolves a live channel's media url and captures it with ffmpeg until the
/// stream ends or shutdown is requested.
pub struct Recorder {
    ffmpeg: String,
    mode: CaptureMode,
    resolver: UrlResolver,
    page_url: String,
    output_dir: PathBuf,
    prefix: String,
    log_output: bool,
    target: String,
}

impl Recorder {
    pub fn new(app: &AppConfig, watcher: &WatcherConfig, target: &str) -> Self {
        Self {
            ffmpeg: app.ffmpeg().to_string(),
            mode: CaptureMode::from_encode_flag(app.encode_while_downloading),
            resolver: UrlResolver::new(app.ytdlp()),
            page_url: watcher.live_page_url(),
            output_dir: watcher.output_dir(),
            prefix: watcher.filename_prefix().to_string(),
            log_output: watcher.log_ffmpeg_output,
            target: target.to_string(),
        }
    }

    pub fn with_resolver(mut self, resolver: UrlResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// `<output dir>/<prefix>_<yyyy-MM-dd_HH-mm-ss>.mkv`
    pub fn output_path(&self, time: &DateTime<Local>) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}.{}",
            self.prefix,
            time.format(TIMESTAMP_FORMAT),
            ffmpeg::INTERMEDIATE_EXT
        ))
    }

    pub async fn record(&self, cancel: &CancellationToken) -> Result<RecordingOutcome, RecordError> {
        let url = tokio::select! {
            url = self.resolver.resolve(&self.page_url) => url?,
            _ = cancel.cancelled() => return Err(RecordError::Cancelled),
        };

        let mut session = self.start(&url).await?;
        let mut stdin = session.child.stdin.take();

        let outcome = tokio::select! {
            status = session.child.wait() => RecordingOutcome::Finished {
                path: session.path.clone(),
                status: status?,
            },
            _ = cancel.cancelled() => {
                info!(target: self.target.as_str(), "Gracefully shutting down recording {}", session.path.display());
                match stdin.as_mut() {
                    Some(stdin) => {
                        if let Err(e) = ffmpeg::request_quit(stdin).await {
                            error!(target: self.target.as_str(), "Error occurred while gracefully shutting down ffmpeg: {}", e);
                        }
                    }
                    None => error!(target: self.target.as_str(), "ffmpeg stdin is not available, waiting for it to exit"),
                }
                RecordingOutcome::Stopped {
                    path: session.path.clone(),
                    status: session.child.wait().await?,
                }
            }
        };
        drop(stdin);

        for reader in session.readers.drain(..) {
            let _ = reader.await;
        }

        let size = tokio::fs::metadata(&session.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        info!(
            target: self.target.as_str(),
            "Recording {} ended after {}s ({})",
            session.path.display(),
            (Local::now() - session.started).num_seconds(),
            util::format_bytes(size)
        );

        Ok(outcome)
    }

    async fn start(&self, url: &str) -> Result<RecordingSession, RecordError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let started = Local::now();
        let path = self.output_path(&started);
        let command = ffmpeg::capture_command(&self.ffmpeg, url, self.mode, &path);
        info!(target: self.target.as_str(), "Starting process: {}", ffmpeg::describe(&command));

        let mut child = ffmpeg::spawn_capture(command, self.log_output)?;

        let mut readers = Vec::new();
        if self.log_output {
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(stdout) = child.stdout.take() {
                readers.push(tokio::spawn(drain_output(
                    stdout,
                    self.target.clone(),
                    file_name.clone(),
                    false,
                )));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(tokio::spawn(drain_output(
                    stderr,
                    self.target.clone(),
                    file_name,
                    true,
                )));
            }
        }

        Ok(RecordingSession {
            path,
            started,
            child,
            readers,
        })
    }
}

/// Splits ffmpeg output into lines ending at `\n` or `\r`. Progress updates
/// only end with `\r`, so the real messages around them stay separate.
struct OutputLines<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R> OutputLines<R>
where
    R: AsyncRead + Unpin,
{
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.line.clear();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(&self.line).into_owned()));
            }

            let (used, complete) = match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    self.line.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    self.line.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.reader.consume(used);

            if complete {
                return Ok(Some(String::from_utf8_lossy(&self.line).into_owned()));
            }
        }
    }
}

fn is_loggable(line: &str) -> bool {
    !line.trim().is_empty() && !ffmpeg::is_progress_line(line)
}

/// Logs everything ffmpeg prints except its progress reports. Reading never
/// stops early, or ffmpeg would block on a full pipe.
async fn drain_output<R>(reader: R, target: String, file_name: String, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = OutputLines::new(reader);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(target: target.as_str(), "[{}] Error while reading ffmpeg output: {}", file_name, e);
                break;
            }
        };
        if !is_loggable(&line) {
            continue;
        }

        if is_stderr {
            warn!(target: target.as_str(), "[{}] {}", file_name, line);
        } else {
            info!(target: target.as_str(), "[{}] {}", file_name, line);
        }
    }
}
