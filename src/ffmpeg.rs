use std::{path::Path, process::Stdio};

use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
};

/// Container used while a stream is being captured.
pub const INTERMEDIATE_EXT: &str = "mkv";
/// Container produced once a capture has been remuxed.
pub const FINAL_EXT: &str = "mp4";

/// ffmpeg prefixes for its periodic progress report.
pub const PROGRESS_PREFIXES: [&str; 4] = ["frame=", "size=", "time=", "bitrate="];

/// ffmpeg's interactive "quit" key.
const QUIT_COMMAND: &[u8] = b"q\n";

#[derive(thiserror::Error, Debug)]
pub enum FfmpegError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("ffmpeg exited with {0}")]
    ExitStatus(std::process::ExitStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// `-c copy`
    StreamCopy,
    /// `-c:v libx264 -c:a aac`
    Transcode,
}

impl CaptureMode {
    pub fn from_encode_flag(encode: bool) -> Self {
        if encode {
            CaptureMode::Transcode
        } else {
            CaptureMode::StreamCopy
        }
    }

    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            CaptureMode::StreamCopy => &["-c", "copy"],
            CaptureMode::Transcode => &["-c:v", "libx264", "-c:a", "aac"],
        }
    }
}

pub fn capture_command(program: &str, url: &str, mode: CaptureMode, output: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-i")
        .arg(url)
        .args(mode.codec_args())
        .arg("-strftime")
        .arg("1")
        .arg(output);
    command
}

/// Renders a command the way it would be typed, for logging.
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Starts a capture with stdin held open for the quit handshake. Output is
/// piped only when someone is going to drain it.
pub fn spawn_capture(mut command: Command, pipe_output: bool) -> Result<Child, FfmpegError> {
    let output = || {
        if pipe_output {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    command
        .stdin(Stdio::piped())
        .stdout(output())
        .stderr(output())
        .kill_on_drop(false)
        .spawn()
        .map_err(FfmpegError::IoError)
}

/// Asks a running capture to finish its container and exit.
pub async fn request_quit(stdin: &mut ChildStdin) -> Result<(), FfmpegError> {
    stdin.write_all(QUIT_COMMAND).await?;
    stdin.flush().await?;
    Ok(())
}

pub fn is_progress_line(line: &str) -> bool {
    PROGRESS_PREFIXES.iter().any(|p| line.starts_with(p))
}

pub async fn remux(program: &str, input: &Path, output: &Path) -> Result<(), FfmpegError> {
    let mut child = Command::new(program);

    child
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input)
        .arg("-c")
        .arg("copy")
        .arg(output)
        .stdin(Stdio::null());

    let status = child.spawn().map_err(FfmpegError::IoError)?.wait().await?;
    if !status.success() {
        return Err(FfmpegError::ExitStatus(status));
    }

    Ok(())
}
