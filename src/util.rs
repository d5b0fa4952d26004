use std::{sync::Arc, time::Duration};

use reqwest::Url;
use reqwest_cookie_store::CookieStoreMutex;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared by every watcher. Failed requests are not retried here; a failed
/// live check simply waits for the next poll.
#[derive(Clone)]
pub struct HttpClient {
    pub client: reqwest::Client,
    pub cookies: Arc<CookieStoreMutex>,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    UrlError(#[from] url::ParseError),
}

impl HttpClient {
    pub fn new() -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());

        let client = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(HttpClient { client, cookies })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let url = Url::parse(url)?;
        self.fetch_url(url).await
    }

    /// Appends `params` to `base` as an escaped query string before fetching.
    pub async fn fetch_text_with_query(
        &self,
        base: &str,
        params: &[(&str, &str)],
    ) -> Result<String, DownloadError> {
        let url = Url::parse_with_params(base, params)?;
        self.fetch_url(url).await
    }

    async fn fetch_url(&self, url: Url) -> Result<String, DownloadError> {
        self.client
            .get(url)
            .send()
            .await?
            .text()
            .await
            .map_err(|e| e.into())
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "TiB";
    }

    format!("{:.2} {}", bytes, suffix)
}
