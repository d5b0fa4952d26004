use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};
use tlr_rs::{
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    live::LiveDetector,
    logging, util,
    watcher::Scheduler,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Records TikTok live streams")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("Could not install logger: {}", e);
    }

    let args = Args::parse();
    info!("Starting Tiktok Live Recorder...");
    info!(
        "Loading configuration from [{}] resolved to [{}]",
        args.config.display(),
        std::fs::canonicalize(&args.config)
            .unwrap_or_else(|_| args.config.clone())
            .display()
    );

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // One worker per watcher, a recording keeps its worker busy.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.watchers.len().max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> ExitCode {
    let client = match util::HttpClient::new() {
        Ok(client) => client,
        Err(e) => {
            error!("Could not create HttpClient: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let detector = Arc::new(LiveDetector::new(client));
    let cancel = CancellationToken::new();

    info!("Creating Watchers...");
    let scheduler = match Scheduler::start(&config, detector, cancel.clone()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Could not create watchers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, stopping watchers...");
        cancel.cancel();
    });

    scheduler.join().await;
    info!("All watchers stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
