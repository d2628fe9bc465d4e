//! Visual signal actuator.
//!
//! The [`Signal`] trait is the seam between the alarm logic and the LED
//! hardware. [`Twinkly`] drives a real device over its local HTTP API;
//! [`SignalDriver`] sits in front of either and turns alarm commands into
//! best-effort, time-boxed calls.

mod driver;
mod twinkly;

pub use driver::{ApplyOutcome, SignalDriver};
pub use twinkly::{Twinkly, TwinklyConfig};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::tracing::prelude::*;

/// Delay between colors in [`color_cycle`].
pub const CYCLE_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const RED: Color = Color::new(255, 0, 0);
    pub const GREEN: Color = Color::new(0, 255, 0);
    pub const BLUE: Color = Color::new(0, 0, 255);
    /// Shown for the threshold warning.
    pub const AMBER: Color = Color::new(255, 255, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.red, self.green, self.blue)
    }
}

/// A device found on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Host name or IP address the device answers HTTP on.
    pub host: String,
    /// Name the device reported, if it was discovered.
    pub name: Option<String>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("device discovery failed: {0}")]
    Discovery(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device answered, but not with what the API promises.
    #[error("unexpected device response: {0}")]
    Protocol(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Controls one LED device.
///
/// Implementations must not cache a device handle between calls; every
/// call is independently fallible, and a failure says nothing about the
/// next call.
#[async_trait]
pub trait Signal: Send + Sync {
    /// Locate the device.
    async fn discover(&self) -> Result<Device, SignalError>;

    /// Switch to static color mode showing `color`.
    async fn set_color(&self, color: Color) -> Result<(), SignalError>;

    /// Return to the device's normal effect.
    async fn resume_normal(&self) -> Result<(), SignalError>;

    async fn set_warning(&self) -> Result<(), SignalError> {
        self.set_color(Color::AMBER).await
    }

    async fn set_silence_alarm(&self) -> Result<(), SignalError> {
        self.set_color(Color::RED).await
    }
}

/// How a [`color_cycle`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// All requested rounds were shown.
    Completed,
    /// Shutdown was requested first. No further call reached the device.
    Cancelled,
}

/// Cycle red, green and blue, `rounds` times or until cancelled when
/// `rounds` is `None`.
///
/// Used to announce startup and for smoke-testing the device path.
pub async fn color_cycle<S>(
    signal: &S,
    rounds: Option<u32>,
    shutdown: &CancellationToken,
) -> Result<CycleEnd, SignalError>
where
    S: Signal + ?Sized,
{
    let mut round = 0;
    while rounds.is_none_or(|n| round < n) {
        for color in [Color::RED, Color::GREEN, Color::BLUE] {
            if shutdown.is_cancelled() {
                return Ok(CycleEnd::Cancelled);
            }
            signal.set_color(color).await?;
            info!(color = %color, "Set signal color");

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(CycleEnd::Cancelled),
                _ = time::sleep(CYCLE_STEP) => {}
            }
        }
        round += 1;
    }

    Ok(CycleEnd::Completed)
}

/// Startup announcement: one color cycle, then back to the normal effect.
///
/// Failures are logged and otherwise ignored. A shutdown during the cycle
/// leaves the device as it is.
pub async fn announce<S>(signal: &S, shutdown: &CancellationToken) -> CycleEnd
where
    S: Signal + ?Sized,
{
    match color_cycle(signal, Some(1), shutdown).await {
        Ok(CycleEnd::Cancelled) => {
            debug!("Startup announcement interrupted by shutdown");
            return CycleEnd::Cancelled;
        }
        Ok(CycleEnd::Completed) => {}
        Err(e) => warn!(error = %e, "Startup announcement failed"),
    }

    if shutdown.is_cancelled() {
        return CycleEnd::Cancelled;
    }
    if let Err(e) = signal.resume_normal().await {
        warn!(error = %e, "Could not restore normal effect after announcement");
    }
    CycleEnd::Completed
}
