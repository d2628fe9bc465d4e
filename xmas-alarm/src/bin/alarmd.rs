//! Alarm monitor daemon.
//!
//! Configured entirely from the environment; see the `config` module for
//! the variables.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use xmas_alarm::alarm::AlarmCoordinator;
use xmas_alarm::feed::MqttFeed;
use xmas_alarm::monitor::Monitor;
use xmas_alarm::signal::{self, CycleEnd, SignalDriver, Twinkly};
use xmas_alarm::tracing::prelude::*;
use xmas_alarm::Config;

const READING_QUEUE: usize = 64;
const COMMAND_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    xmas_alarm::tracing::init_journald_or_stdout();

    let config = Config::from_env().context("invalid configuration")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting xmas-alarm");
    config.log_summary();

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let twinkly = Twinkly::new(config.signal.clone()).context("failed to set up signal")?;

    if config.test_mode {
        if let Err(e) = signal::color_cycle(&twinkly, None, &shutdown).await {
            error!(error = %e, "Test cycle failed");
            return Err(e.into());
        }
        info!("Test mode stopped");
        return Ok(());
    }

    if signal::announce(&twinkly, &shutdown).await == CycleEnd::Cancelled {
        info!("Stopped during startup");
        return Ok(());
    }

    let (reading_tx, reading_rx) = mpsc::channel(READING_QUEUE);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

    let connect = MqttFeed::connect(config.feed.clone(), reading_tx, shutdown.clone());
    let feed = tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Stopped during startup");
            return Ok(());
        }
        result = connect => match result {
            Ok(feed) => feed,
            Err(e) => {
                error!(server = %config.feed.server(), error = %e, "Cannot connect to MQTT server");
                return Err(e).context("MQTT connection failed");
            }
        },
    };

    let monitor = Monitor::new(
        AlarmCoordinator::new(&config.alarm),
        config.tick_interval,
        reading_rx,
        command_tx,
    );
    let driver = SignalDriver::new(twinkly, config.signal.timeout);

    let tasks = [
        tokio::spawn(feed.run()),
        tokio::spawn(monitor.run(shutdown.clone())),
        tokio::spawn(driver.run(command_rx, shutdown.clone())),
    ];

    shutdown.cancelled().await;
    info!("Shutting down");

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }

    info!("Stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }

    shutdown.cancel();
}
