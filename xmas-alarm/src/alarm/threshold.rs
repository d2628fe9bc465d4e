//! Sustained-breach detection for the threshold alarm.
//!
//! A single reading above the threshold means little; the alarm only
//! cares about runs of readings that stay at or above it for longer than
//! the alarm period.
//!
//! # Window
//!
//! ```text
//!            value >= threshold                 elapsed > alarm_period
//!  No run ─────────────────────► Run(since) ─────────────────────────► sustained
//!    ▲                               │                                    │
//!    │       value < threshold       │        value < threshold           │
//!    └───────────────────────────────┴────────────────────────────────────┘
//! ```
//!
//! The run starts at the first qualifying reading and is dropped by the
//! first reading below the threshold. Later qualifying readings never
//! move `since`, so an elevated run that has already fired stays fired
//! rather than re-arming.

use std::time::Duration;

use tokio::time::Instant;

use super::Reading;
use crate::error::{Error, Result};

/// Start of the current uninterrupted run of qualifying readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdWindow {
    since: Option<Instant>,
}

impl ThresholdWindow {
    /// When the current run began, if one is in progress.
    pub fn since(&self) -> Option<Instant> {
        self.since
    }

    pub fn is_active(&self) -> bool {
        self.since.is_some()
    }
}

/// Tracks how long readings have continuously stayed at or above a
/// threshold.
///
/// [`observe`](Self::observe) reports a level ("the run is sustained"),
/// not an edge. Turning levels into alarm transitions is the
/// coordinator's job.
#[derive(Debug)]
pub struct ThresholdEvaluator {
    threshold: f64,
    alarm_period: Duration,
    window: ThresholdWindow,
}

impl ThresholdEvaluator {
    pub fn new(threshold: f64, alarm_period: Duration) -> Self {
        Self {
            threshold,
            alarm_period,
            window: ThresholdWindow::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn alarm_period(&self) -> Duration {
        self.alarm_period
    }

    pub fn window(&self) -> ThresholdWindow {
        self.window
    }

    /// A value exactly at the threshold qualifies.
    pub fn qualifies(&self, value: f64) -> bool {
        value >= self.threshold
    }

    /// Feed one reading into the window.
    ///
    /// Returns whether the run is sustained as of the reading's
    /// observation time. Non-finite values are rejected and leave the
    /// window untouched.
    pub fn observe(&mut self, reading: &Reading) -> Result<bool> {
        if !reading.value.is_finite() {
            return Err(Error::InvalidReading(format!(
                "non-finite value {}",
                reading.value
            )));
        }

        if self.qualifies(reading.value) {
            if self.window.since.is_none() {
                self.window.since = Some(reading.observed_at);
            }
        } else {
            self.window.since = None;
        }

        Ok(self.is_sustained(reading.observed_at))
    }

    /// Whether the current run has lasted strictly longer than the alarm
    /// period at `now`.
    pub fn is_sustained(&self, now: Instant) -> bool {
        self.window
            .since
            .is_some_and(|since| now.saturating_duration_since(since) > self.alarm_period)
    }

    /// How long the current run has lasted at `now`.
    pub fn run_length(&self, now: Instant) -> Option<Duration> {
        self.window
            .since
            .map(|since| now.saturating_duration_since(since))
    }
}
