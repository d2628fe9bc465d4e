mod clock;
mod config;
mod coordinator;
mod threshold;

pub use clock::is_silent;
pub use config::AlarmConfig;
pub use coordinator::{AlarmCoordinator, AlarmKind, AlarmState, SignalCommand};
pub use threshold::{ThresholdEvaluator, ThresholdWindow};

use tokio::time::Instant;

/// One scalar value received from the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub observed_at: Instant,
}

impl Reading {
    pub fn new(value: f64, observed_at: Instant) -> Self {
        Self { value, observed_at }
    }

    /// A reading observed right now.
    pub fn now(value: f64) -> Self {
        Self::new(value, Instant::now())
    }
}
