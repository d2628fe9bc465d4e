//! Crate-wide error type.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An environment variable was missing a usable value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A payload or reading that cannot be evaluated.
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The broker did not acknowledge the connection in time.
    #[error("no answer from {server} within {timeout:?}")]
    ConnectTimeout { server: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;
