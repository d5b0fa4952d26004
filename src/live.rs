use std::fmt;

use serde::Deserialize;
use serde_aux::prelude::*;

use crate::util;

pub const SIGN_URL: &str = "https://tikrec.com/tiktok/room/api/sign";
pub const CHECK_ALIVE_URL: &str = "https://webcast.tiktok.com/webcast/room/check_alive/";

pub const USER_NOT_FOUND: &str = "user_not_found";

/// Outcome of one live check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    Live(String),
    NotLive,
    /// The check could not decide; treated like `NotLive` for scheduling.
    Indeterminate(String),
}

impl LiveStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LiveStatus::Live(_))
    }
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveStatus::Live(room_id) => write!(f, "live (room {})", room_id),
            LiveStatus::NotLive => write!(f, "not live"),
            LiveStatus::Indeterminate(reason) => write!(f, "indeterminate ({})", reason),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("request failed: {0}")]
    DownloadError(#[from] util::DownloadError),
    #[error("could not parse response: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("response is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignResponse {
    pub signed_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserResponse {
    pub message: Option<String>,
    pub data: Option<UserData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserData {
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    // Upstream has sent this both as a string and as a number
    pub room_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckAliveResponse {
    pub data: Option<Vec<RoomAlive>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomAlive {
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub alive: bool,
}

fn is_user_not_found(message: &Option<String>) -> bool {
    message
        .as_deref()
        .map(|m| m.eq_ignore_ascii_case(USER_NOT_FOUND))
        .unwrap_or(false)
}

impl UserResponse {
    pub fn room_id(&self) -> Option<String> {
        let room_id = self.data.as_ref()?.user.as_ref()?.room_id.as_ref()?;
        match room_id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl CheckAliveResponse {
    pub fn alive(&self) -> Option<bool> {
        self.data.as_ref()?.first().map(|room| room.alive)
    }
}

/// Seam between a watcher and whatever decides whether a channel is live.
#[async_trait::async_trait]
pub trait LiveCheck: Send + Sync {
    async fn check(&self, channel: &str) -> LiveStatus;
}

/// Three-hop live check: signing endpoint, signed user lookup, room liveness.
pub struct LiveDetector {
    client: util::HttpClient,
    sign_url: String,
    check_alive_url: String,
}

impl LiveDetector {
    pub fn new(client: util::HttpClient) -> Self {
        Self::with_endpoints(client, SIGN_URL, CHECK_ALIVE_URL)
    }

    pub fn with_endpoints(client: util::HttpClient, sign_url: &str, check_alive_url: &str) -> Self {
        Self {
            client,
            sign_url: sign_url.to_string(),
            check_alive_url: check_alive_url.to_string(),
        }
    }

    async fn try_check(&self, channel: &str) -> Result<LiveStatus, DetectError> {
        let body = self
            .client
            .fetch_text_with_query(&self.sign_url, &[("unique_id", channel)])
            .await?;
        let signed: SignResponse = serde_json::from_str(&body)?;
        if is_user_not_found(&signed.message) {
            return Ok(LiveStatus::Indeterminate(USER_NOT_FOUND.into()));
        }
        let signed_url = signed
            .signed_url
            .ok_or(DetectError::MissingField("signed_url"))?;

        let body = self.client.fetch_text(&signed_url).await?;
        let user: UserResponse = serde_json::from_str(&body)?;
        if is_user_not_found(&user.message) {
            return Ok(LiveStatus::Indeterminate(USER_NOT_FOUND.into()));
        }
        let room_id = user.room_id().unwrap_or_default();

        let body = self
            .client
            .fetch_text_with_query(
                &self.check_alive_url,
                &[
                    ("aid", "1988"),
                    ("region", "CH"),
                    ("room_ids", room_id.as_str()),
                    ("user_is_login", "true"),
                ],
            )
            .await?;
        let alive: CheckAliveResponse = serde_json::from_str(&body)?;

        match alive.alive() {
            Some(true) => Ok(LiveStatus::Live(room_id)),
            Some(false) => Ok(LiveStatus::NotLive),
            None => Err(DetectError::MissingField("data[0].alive")),
        }
    }
}

#[async_trait::async_trait]
impl LiveCheck for LiveDetector {
    async fn check(&self, channel: &str) -> LiveStatus {
        match self.try_check(channel).await {
            Ok(status) => status,
            Err(e) => LiveStatus::Indeterminate(e.to_string()),
        }
    }
}
