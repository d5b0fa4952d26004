//! # tlr-rs
//!
//! Watches a set of TikTok channels, records each one with ffmpeg while it is
//! live and remuxes the finished captures from `.mkv` to `.mp4`.
//!
//! ## Usage
//!
//! Every channel gets a [`watcher::Watcher`] that polls on a fixed delay. The
//! [`watcher::Scheduler`] owns them and keeps them running until its
//! cancellation token fires, at which point any capture in progress is asked
//! to quit so its container is finalized.
//!
//! ```rust,no_run
//! use std::{path::Path, sync::Arc};
//!
//! use tlr_rs::{config::AppConfig, live::LiveDetector, util, watcher::Scheduler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::load(Path::new("config/config.json")).unwrap();
//!
//!     // Checks live status through the signing service and TikTok's webcast api
//!     let client = util::HttpClient::new().unwrap();
//!     let detector = Arc::new(LiveDetector::new(client));
//!
//!     let cancel = CancellationToken::new();
//!     let scheduler = Scheduler::start(&config, detector, cancel.clone()).unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     cancel.cancel();
//!     scheduler.join().await;
//! }
//! ```
//!
//! Recordings land in each watcher's output directory as
//! `<prefix>_<yyyy-MM-dd_HH-mm-ss>.mkv` and are converted to
//! `<prefix>_<yyyy-MM-dd_HH-mm-ss>.mp4` once the stream ends.

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod convert;
pub mod ffmpeg;
pub mod live;
pub mod logging;
pub mod recorder;
pub mod util;
pub mod watcher;
pub mod ytdlp;

#[cfg(all(test, unix))]
mod testutil;
