//! Combines the threshold and silence alarms into one signal command.
//!
//! # Precedence
//!
//! ```text
//!  silence   threshold   combined
//!  Active    any         Silence
//!  Inactive  Active      ThresholdWarning
//!  Inactive  Inactive    Normal
//! ```
//!
//! Both alarms keep their own state at all times. Only the combined value
//! is shown on the actuator, and a command is emitted only when an event
//! changes it. A threshold transition that happens while silence is active
//! therefore emits nothing; its effect shows up when silence clears.

use std::time::Duration;

use tokio::time::Instant;

use super::clock::is_silent;
use super::config::AlarmConfig;
use super::threshold::ThresholdEvaluator;
use super::Reading;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AlarmKind {
    Threshold,
    Silence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
pub enum AlarmState {
    #[default]
    Inactive,
    Active,
}

/// What the actuator should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SignalCommand {
    /// No alarm, the device runs its normal effect.
    Normal,
    /// Readings stayed at or above the threshold for the alarm period.
    ThresholdWarning,
    /// No readings for the no-data timeout.
    Silence,
}

impl SignalCommand {
    /// Apply the precedence rule: silence dominates the threshold alarm.
    pub fn combine(threshold: AlarmState, silence: AlarmState) -> Self {
        match (silence, threshold) {
            (AlarmState::Active, _) => SignalCommand::Silence,
            (AlarmState::Inactive, AlarmState::Active) => SignalCommand::ThresholdWarning,
            (AlarmState::Inactive, AlarmState::Inactive) => SignalCommand::Normal,
        }
    }
}

/// Owns both alarm states and turns readings and watchdog ticks into
/// edge-triggered signal commands.
#[derive(Debug)]
pub struct AlarmCoordinator {
    evaluator: ThresholdEvaluator,
    nodata_timeout: Duration,
    threshold: AlarmState,
    silence: AlarmState,
    last_observed_at: Option<Instant>,
}

impl AlarmCoordinator {
    pub fn new(config: &AlarmConfig) -> Self {
        Self {
            evaluator: ThresholdEvaluator::new(config.threshold, config.alarm_period),
            nodata_timeout: config.nodata_timeout,
            threshold: AlarmState::Inactive,
            silence: AlarmState::Inactive,
            last_observed_at: None,
        }
    }

    pub fn state(&self, kind: AlarmKind) -> AlarmState {
        match kind {
            AlarmKind::Threshold => self.threshold,
            AlarmKind::Silence => self.silence,
        }
    }

    /// The command the actuator should currently show.
    pub fn combined(&self) -> SignalCommand {
        SignalCommand::combine(self.threshold, self.silence)
    }

    pub fn last_observed_at(&self) -> Option<Instant> {
        self.last_observed_at
    }

    /// Process one reading from the feed.
    ///
    /// A valid reading refreshes the last-reading clock and re-checks the
    /// watchdog first, so it clears silence before threshold logic runs.
    /// Invalid readings change nothing.
    pub fn on_reading(&mut self, reading: Reading) -> Option<SignalCommand> {
        let before = self.combined();

        let sustained = match self.evaluator.observe(&reading) {
            Ok(sustained) => sustained,
            Err(e) => {
                warn!(error = %e, "Discarding reading");
                return None;
            }
        };

        trace!(value = %reading.value, sustained, "Reading observed");

        self.last_observed_at = Some(reading.observed_at);
        self.check_silence(reading.observed_at);

        if !self.evaluator.qualifies(reading.value) {
            self.clear_threshold(reading.value);
        } else if sustained {
            self.raise_threshold(reading.observed_at);
        }

        self.emit(before)
    }

    /// Periodic watchdog tick.
    ///
    /// Besides the silence check, a tick also notices a run that became
    /// sustained between readings, so the warning does not wait for the
    /// next message.
    pub fn on_tick(&mut self, now: Instant) -> Option<SignalCommand> {
        let before = self.combined();

        self.check_silence(now);
        if self.evaluator.is_sustained(now) {
            self.raise_threshold(now);
        }

        self.emit(before)
    }

    fn check_silence(&mut self, now: Instant) {
        let silent = is_silent(now, self.last_observed_at, self.nodata_timeout);

        match (self.silence, silent) {
            (AlarmState::Inactive, true) => {
                self.silence = AlarmState::Active;
                match self.last_observed_at {
                    Some(last) => info!(
                        timeout_s = self.nodata_timeout.as_secs(),
                        silent_for_s = now.saturating_duration_since(last).as_secs(),
                        "No data received within timeout, silence alarm raised"
                    ),
                    None => info!(
                        timeout_s = self.nodata_timeout.as_secs(),
                        "No data received yet, silence alarm raised"
                    ),
                }
            }
            (AlarmState::Active, false) => {
                self.silence = AlarmState::Inactive;
                info!("Data received, silence alarm cleared");
            }
            _ => {}
        }
    }

    fn raise_threshold(&mut self, now: Instant) {
        if self.threshold == AlarmState::Active {
            return;
        }

        self.threshold = AlarmState::Active;
        info!(
            threshold = %self.evaluator.threshold(),
            alarm_period_s = self.evaluator.alarm_period().as_secs(),
            run_s = self.evaluator.run_length(now).unwrap_or_default().as_secs(),
            "Threshold exceeded for alarm period, threshold alarm raised"
        );

        if self.silence == AlarmState::Active {
            debug!("Threshold warning deferred while silence alarm is active");
        }
    }

    fn clear_threshold(&mut self, value: f64) {
        if self.threshold == AlarmState::Inactive {
            return;
        }

        self.threshold = AlarmState::Inactive;
        info!(
            value = %value,
            threshold = %self.evaluator.threshold(),
            "Value below threshold, threshold alarm cleared"
        );
    }

    fn emit(&self, before: SignalCommand) -> Option<SignalCommand> {
        let after = self.combined();
        if after == before {
            return None;
        }

        info!(previous = %before, command = %after, "Signal command changed");
        Some(after)
    }
}
