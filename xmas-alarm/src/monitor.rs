//! Event loop between the feed and the signal driver.
//!
//! Readings and watchdog ticks are the only inputs; both go through the
//! [`AlarmCoordinator`] on this one task, so alarm state is never shared.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alarm::{AlarmCoordinator, Reading, SignalCommand};
use crate::tracing::prelude::*;

pub struct Monitor {
    coordinator: AlarmCoordinator,
    tick_interval: Duration,
    reading_rx: mpsc::Receiver<Reading>,
    command_tx: mpsc::Sender<SignalCommand>,
}

impl Monitor {
    pub fn new(
        coordinator: AlarmCoordinator,
        tick_interval: Duration,
        reading_rx: mpsc::Receiver<Reading>,
        command_tx: mpsc::Sender<SignalCommand>,
    ) -> Self {
        Self {
            coordinator,
            tick_interval,
            reading_rx,
            command_tx,
        }
    }

    /// Run until shutdown.
    ///
    /// A closed reading channel is not a reason to stop: the watchdog keeps
    /// ticking and raises the silence alarm.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut feed_open = true;

        debug!(tick_ms = self.tick_interval.as_millis() as u64, "Monitor started");

        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,

                reading = self.reading_rx.recv(), if feed_open => match reading {
                    Some(reading) => self.coordinator.on_reading(reading),
                    None => {
                        warn!("Reading feed closed");
                        feed_open = false;
                        None
                    }
                },

                now = ticker.tick() => self.coordinator.on_tick(now),
            };

            if let Some(command) = command {
                if self.command_tx.send(command).await.is_err() {
                    debug!(command = %command, "Signal driver gone, command dropped");
                }
            }
        }

        trace!("Monitor stopped");
    }
}
