use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Mutex, OnceLock},
};

use log::{Log, Metadata, Record, SetLoggerError};

/// Watchers log under `channel::<name>`.
pub const CHANNEL_TARGET_PREFIX: &str = "channel::";

static CHANNEL_FILES: OnceLock<Mutex<HashMap<String, File>>> = OnceLock::new();

fn channel_files() -> &'static Mutex<HashMap<String, File>> {
    CHANNEL_FILES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn channel_target(channel: &str) -> String {
    format!("{}{}", CHANNEL_TARGET_PREFIX, channel)
}

/// Copies every record logged under `target` into `path` (appending).
pub fn attach_file(target: &str, path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut files) = channel_files().lock() {
        files.insert(target.to_string(), file);
    }
    Ok(())
}

pub fn detach_file(target: &str) {
    if let Ok(mut files) = channel_files().lock() {
        files.remove(target);
    }
}

/// env_logger for the terminal, plus per-channel log files.
struct ChannelLogger {
    inner: env_logger::Logger,
}

impl ChannelLogger {
    fn write_to_file(&self, record: &Record) {
        if !record.target().starts_with(CHANNEL_TARGET_PREFIX) {
            return;
        }
        let Ok(mut files) = channel_files().lock() else {
            return;
        };
        if let Some(file) = files.get_mut(record.target()) {
            let _ = writeln!(
                file,
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            );
        }
    }
}

impl Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        self.write_to_file(record);
    }

    fn flush(&self) {
        self.inner.flush();
        if let Ok(mut files) = channel_files().lock() {
            for file in files.values_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Installs the global logger. `RUST_LOG` overrides the default `info` level.
pub fn init() -> Result<(), SetLoggerError> {
    let inner = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .build();
    let max_level = inner.filter();

    log::set_boxed_logger(Box::new(ChannelLogger { inner }))?;
    log::set_max_level(max_level);
    Ok(())
}
