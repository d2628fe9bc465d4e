//! Alarm monitor for a single sensor feed.
//!
//! Readings arrive over MQTT, two alarm conditions are evaluated against
//! them (a sustained threshold breach and data silence), and the combined
//! result is shown on a Twinkly LED string.

pub mod alarm;
pub mod config;
pub mod error;
pub mod feed;
pub mod monitor;
pub mod signal;
pub mod tracing;

pub use config::Config;
pub use error::{Error, Result};
