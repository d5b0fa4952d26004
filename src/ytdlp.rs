use std::{process::Stdio, time::Duration};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_retry::{strategy::FixedInterval, RetryIf};

pub const RESOLVE_ATTEMPTS: usize = 5;
const RESOLVE_DELAY: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("I/O error running resolver")]
    IoError(#[from] std::io::Error),
    #[error("resolver printed no url")]
    NoOutput,
}

/// Asks yt-dlp (`<program> -g <page>`) for the direct media url of a live
/// page. yt-dlp sometimes prints nothing for a live stream, so empty output is
/// retried; failing to run the program is not.
pub struct UrlResolver {
    program: String,
    attempts: usize,
    delay: Duration,
}

impl UrlResolver {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            attempts: RESOLVE_ATTEMPTS,
            delay: RESOLVE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn resolve(&self, page_url: &str) -> Result<String, ResolveError> {
        let strategy = FixedInterval::new(self.delay).take(self.attempts.saturating_sub(1));

        RetryIf::start(
            strategy,
            || self.attempt(page_url),
            |e: &ResolveError| {
                if matches!(e, ResolveError::NoOutput) {
                    debug!("Resolver returned nothing for {}, retrying", page_url);
                    true
                } else {
                    false
                }
            },
        )
        .await
    }

    async fn attempt(&self, page_url: &str) -> Result<String, ResolveError> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-g")
            .arg(page_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut line = String::new();
        if let Some(stdout) = child.stdout.take() {
            BufReader::new(stdout).read_line(&mut line).await?;
        }
        // Only the first line matters; don't leave the process behind.
        let _ = child.kill().await;

        let url = line.trim();
        if url.is_empty() {
            Err(ResolveError::NoOutput)
        } else {
            Ok(url.to_string())
        }
    }
}
