use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AppConfig, WatcherConfig},
    convert::ConversionJob,
    live::{LiveCheck, LiveStatus, USER_NOT_FOUND},
    logging,
    recorder::{RecordError, Recorder, RecordingOutcome},
};

/// Drives one channel: checks whether it is live, records it if so and
/// converts what was recorded.
pub struct Watcher {
    config: WatcherConfig,
    detector: Arc<dyn LiveCheck>,
    recorder: Recorder,
    converter: Arc<ConversionJob>,
    target: String,
}

impl Watcher {
    pub fn new(
        app: &AppConfig,
        config: WatcherConfig,
        detector: Arc<dyn LiveCheck>,
    ) -> std::io::Result<Self> {
        let target = logging::channel_target(&config.channel);
        let output_dir = config.output_dir();
        std::fs::create_dir_all(&output_dir)?;

        if config.log_to_file {
            logging::attach_file(&target, &output_dir.join(format!("{}.log", config.channel)))?;
        }

        Ok(Self {
            recorder: Recorder::new(app, &config, &target),
            converter: Arc::new(ConversionJob::new(app, &config, &target)),
            config,
            detector,
            target,
        })
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_converter(mut self, converter: ConversionJob) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Cleans up after previous runs without holding up the first poll.
    pub fn spawn_startup_repair(&self) -> tokio::task::JoinHandle<()> {
        let converter = self.converter.clone();
        let target = self.target.clone();

        tokio::spawn(async move {
            if let Err(e) = converter.run().await {
                error!(target: target.as_str(), "Startup conversion failed: {}", e);
            }
        })
    }

    /// One poll. When the channel is live this only returns once the
    /// recording and its conversion are done, including a recording stopped
    /// for shutdown.
    pub async fn tick(&self, cancel: &CancellationToken) -> LiveStatus {
        let channel = self.channel();
        let status = self.detector.check(channel).await;

        match &status {
            LiveStatus::Live(room_id) => {
                info!(target: self.target.as_str(), "User {} is live (room {}).", channel, room_id);
                self.record(cancel).await;
            }
            LiveStatus::NotLive => {
                info!(
                    target: self.target.as_str(),
                    "User {} is NOT live, checking again in {} {:?}.",
                    channel,
                    self.config.poll_interval_qty,
                    self.config.poll_interval_unit
                );
            }
            LiveStatus::Indeterminate(reason) if reason == USER_NOT_FOUND => {
                warn!(
                    target: self.target.as_str(),
                    "User {} was reported as not found. If this is the first time watching this user this may be correct, \
                     if seen randomly it is most likely a timeout and can be ignored.",
                    channel
                );
            }
            LiveStatus::Indeterminate(reason) => {
                warn!(target: self.target.as_str(), "Could not query live status of {}: {}", channel, reason);
            }
        }

        status
    }

    async fn record(&self, cancel: &CancellationToken) {
        match self.recorder.record(cancel).await {
            Ok(RecordingOutcome::Finished { path, status }) => {
                info!(
                    target: self.target.as_str(),
                    "Stream ended, ffmpeg exited with {} for {}",
                    status,
                    path.display()
                );
                self.convert().await;
            }
            Ok(RecordingOutcome::Stopped { path, status }) => {
                info!(
                    target: self.target.as_str(),
                    "Recording {} stopped for shutdown, ffmpeg exited with {}",
                    path.display(),
                    status
                );
                self.convert().await;
            }
            Err(RecordError::Cancelled) => {
                info!(target: self.target.as_str(), "Shutdown requested before recording started");
            }
            Err(e @ RecordError::ResolveError(_)) => {
                error!(target: self.target.as_str(), "Error occurred while setting up live stream: {}", e);
            }
            Err(e) => {
                error!(target: self.target.as_str(), "Error occurred while recording live stream: {}", e);
                self.convert().await;
            }
        }
    }

    async fn convert(&self) {
        match self.converter.run().await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(
                    target: self.target.as_str(),
                    "Converted {} recording(s), {} left for the next run",
                    report.converted.len(),
                    report.failed.len()
                );
            }
            Ok(report) => {
                debug!(target: self.target.as_str(), "Converted {} recording(s)", report.converted.len());
            }
            Err(e) => {
                error!(target: self.target.as_str(), "Conversion of {} failed: {}", self.converter.dir().display(), e);
            }
        }
    }

    /// Polls with a fixed delay until cancelled: the next poll is scheduled
    /// `poll_interval` after the previous one finished, never on a fixed clock.
    pub async fn run(self, cancel: CancellationToken) {
        let interval = self.config.poll_interval();
        let startup = self.spawn_startup_repair();

        while !cancel.is_cancelled() {
            if AssertUnwindSafe(self.tick(&cancel))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(target: self.target.as_str(), "Unhandled panic in watcher for {}", self.channel());
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        let _ = startup.await;
        info!(target: self.target.as_str(), "Watcher for {} stopped", self.channel());
        logging::detach_file(&self.target);
    }
}

/// Owns every watcher task.
pub struct Scheduler {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Builds a watcher for every configured channel and starts it.
    pub fn start(
        app: &AppConfig,
        detector: Arc<dyn LiveCheck>,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let mut scheduler = Self::new(cancel);
        for config in &app.watchers {
            info!("Spawning watcher job for channel [{}]", config.channel);
            scheduler.spawn(Watcher::new(app, config.clone(), detector.clone())?);
        }
        Ok(scheduler)
    }

    pub fn spawn(&mut self, watcher: Watcher) {
        self.tasks.spawn(watcher.run(self.cancel.clone()));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every watcher to stop. Watchers stop only once cancelled and
    /// any recording in progress has been shut down.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Watcher task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        path::Path,
        sync::Mutex,
        time::Duration,
    };

    use tokio::time::Instant;

    use super::*;

    /// Replays canned statuses and records when it was asked.
    struct ScriptedCheck {
        statuses: Mutex<VecDeque<LiveStatus>>,
        calls: Mutex<Vec<Instant>>,
        busy_for: Duration,
        cancel_after: usize,
        cancel: CancellationToken,
    }

    impl ScriptedCheck {
        fn new(statuses: Vec<LiveStatus>, cancel: &CancellationToken) -> Self {
            Self {
                cancel_after: statuses.len(),
                statuses: Mutex::new(statuses.into()),
                calls: Mutex::new(Vec::new()),
                busy_for: Duration::ZERO,
                cancel: cancel.clone(),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl LiveCheck for ScriptedCheck {
        async fn check(&self, _channel: &str) -> LiveStatus {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            tokio::time::sleep(self.busy_for).await;
            if count >= self.cancel_after {
                self.cancel.cancel();
            }
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(LiveStatus::NotLive)
        }
    }

    fn config(dir: &Path, interval_secs: u64) -> AppConfig {
        AppConfig::from_json(&format!(
            r#"{{
                "ffmpegPath": "/definitely/not/ffmpeg",
                "ytdlpPath": "/definitely/not/yt-dlp",
                "watchers": [{{
                    "channel": "abc",
                    "pollIntervalQty": {},
                    "pollIntervalUnit": "SECONDS",
                    "outputPath": "{}",
                    "logToFile": false
                }}]
            }}"#,
            interval_secs,
            dir.display()
        ))
        .expect("Could not parse config")
    }

    #[tokio::test(start_paused = true)]
    async fn not_live_polls_with_fixed_delay() {
        let dir = tempfile::tempdir().unwrap();
        let app = config(dir.path(), 30);
        let cancel = CancellationToken::new();
        let check = Arc::new(ScriptedCheck::new(
            vec![LiveStatus::NotLive, LiveStatus::NotLive, LiveStatus::NotLive],
            &cancel,
        ));

        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.spawn(Watcher::new(&app, app.watchers[0].clone(), check.clone()).unwrap());
        scheduler.join().await;

        let calls = check.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(30));
        }
        // Nothing was recorded or converted.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_do_not_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let app = config(dir.path(), 30);
        let cancel = CancellationToken::new();
        let mut check = ScriptedCheck::new(vec![LiveStatus::NotLive; 3], &cancel);
        check.busy_for = Duration::from_secs(45);
        let check = Arc::new(check);

        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.spawn(Watcher::new(&app, app.watchers[0].clone(), check.clone()).unwrap());
        scheduler.join().await;

        let calls = check.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(75));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_recording_does_not_stop_polling() {
        let dir = tempfile::tempdir().unwrap();
        let app = config(dir.path(), 10);
        let cancel = CancellationToken::new();
        let check = Arc::new(ScriptedCheck::new(
            vec![
                LiveStatus::Live("123".into()),
                LiveStatus::Indeterminate("user_not_found".into()),
                LiveStatus::NotLive,
            ],
            &cancel,
        ));

        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.spawn(Watcher::new(&app, app.watchers[0].clone(), check.clone()).unwrap());
        scheduler.join().await;

        assert_eq!(check.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_is_contained() {
        struct Flaky {
            calls: Mutex<usize>,
            cancel: CancellationToken,
        }

        #[async_trait::async_trait]
        impl LiveCheck for Flaky {
            async fn check(&self, _channel: &str) -> LiveStatus {
                let count = {
                    let mut calls = self.calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                if count == 1 {
                    panic!("upstream changed shape");
                }
                self.cancel.cancel();
                LiveStatus::NotLive
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let app = config(dir.path(), 5);
        let cancel = CancellationToken::new();
        let check = Arc::new(Flaky {
            calls: Mutex::new(0),
            cancel: cancel.clone(),
        });

        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.spawn(Watcher::new(&app, app.watchers[0].clone(), check.clone()).unwrap());
        scheduler.join().await;

        assert_eq!(*check.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn watchers_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppConfig::from_json(&format!(
            r#"{{
                "watchers": [
                    {{ "channel": "a", "pollIntervalQty": 1, "pollIntervalUnit": "MILLIS",
                       "outputPath": "{0}/a", "logToFile": false }},
                    {{ "channel": "b", "pollIntervalQty": 1, "pollIntervalUnit": "MILLIS",
                       "outputPath": "{0}/b", "logToFile": false }}
                ]
            }}"#,
            dir.path().display()
        ))
        .unwrap();

        struct Counting(Mutex<Vec<String>>, CancellationToken);

        #[async_trait::async_trait]
        impl LiveCheck for Counting {
            async fn check(&self, channel: &str) -> LiveStatus {
                let mut seen = self.0.lock().unwrap();
                seen.push(channel.to_string());
                if seen.iter().filter(|c| *c == "a").count() >= 3
                    && seen.iter().filter(|c| *c == "b").count() >= 3
                {
                    self.1.cancel();
                }
                LiveStatus::NotLive
            }
        }

        let cancel = CancellationToken::new();
        let check = Arc::new(Counting(Mutex::new(Vec::new()), cancel.clone()));
        let scheduler = Scheduler::start(&app, check.clone(), cancel).unwrap();
        assert_eq!(scheduler.len(), 2);
        scheduler.join().await;

        let seen = check.0.lock().unwrap();
        assert!(seen.iter().filter(|c| *c == "a").count() >= 3);
        assert!(seen.iter().filter(|c| *c == "b").count() >= 3);
        assert!(dir.path().join("a").is_dir());
        assert!(dir.path().join("b").is_dir());
    }
}
