//! MQTT reading feed.
//!
//! Subscribes to a single topic and turns each publish into a [`Reading`]
//! for the monitor. Payloads that do not decode to a finite number are
//! dropped here and never reach the alarm logic.
//!
//! The broker has to accept the connection at startup; after that,
//! connection errors are logged and retried with backoff while the
//! monitor's silence alarm reports the gap.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::alarm::Reading;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the request queue between the client handle and the
/// event loop.
const REQUEST_CAPACITY: usize = 10;

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,

    /// How long to wait for the broker to accept the first connection.
    pub connect_timeout: Duration,
}

impl FeedConfig {
    /// `host:port`, for logs and errors.
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.2".to_string(),
            port: 1883,
            topic: "xmas/tree/water/raw".to_string(),
            client_id: "xmas-alarm".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Decode a payload into a reading value.
///
/// Accepts UTF-8 text holding a finite number, surrounding whitespace
/// allowed.
pub fn decode_payload(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| Error::InvalidReading("payload is not UTF-8".into()))?
        .trim();

    let value: f64 = text
        .parse()
        .map_err(|_| Error::InvalidReading(format!("{text:?} is not a number")))?;

    if !value.is_finite() {
        return Err(Error::InvalidReading(format!("{text:?} is not finite")));
    }

    Ok(value)
}

/// Delay schedule between broker reconnect attempts.
///
/// Each failed attempt doubles the nominal delay up to `max`; a ConnAck
/// ends the outage and starts the next one from `initial` again. Returned
/// delays are jittered to [0.5, 1.0) of the nominal value.
struct ReconnectBackoff {
    nominal: Duration,
    initial: Duration,
    max: Duration,
    /// Failed attempts since the last ConnAck.
    attempts: u32,
    // Seeded from OS randomness, so two monitors restarted by the same
    // broker outage do not retry in lockstep.
    jitter_seed: RandomState,
}

impl ReconnectBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            nominal: initial,
            initial,
            max,
            attempts: 0,
            jitter_seed: RandomState::new(),
        }
    }

    /// Record a failed attempt and return how long to wait before the next.
    fn on_failure(&mut self) -> Duration {
        let nominal = self.nominal;
        self.nominal = (self.nominal * 2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);

        let mut hasher = self.jitter_seed.build_hasher();
        hasher.write_u32(self.attempts);
        let jitter = 0.5 + (hasher.finish() as f64 / u64::MAX as f64) * 0.5;

        nominal.mul_f64(jitter)
    }

    /// The broker accepted us again. Returns how many attempts it took.
    fn on_connected(&mut self) -> u32 {
        self.nominal = self.initial;
        std::mem::take(&mut self.attempts)
    }
}

/// Connected MQTT subscription feeding readings to the monitor.
pub struct MqttFeed {
    config: FeedConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    reading_tx: mpsc::Sender<Reading>,
    shutdown: CancellationToken,
    backoff: ReconnectBackoff,
}

impl MqttFeed {
    /// Connect to the broker and subscribe.
    ///
    /// Fails if the broker refuses the connection or does not answer
    /// within `connect_timeout`.
    pub async fn connect(
        config: FeedConfig,
        reading_tx: mpsc::Sender<Reading>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        debug!(server = %config.server(), "Connecting to MQTT server");
        match time::timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    server: config.server(),
                    timeout: config.connect_timeout,
                });
            }
        }

        client.subscribe(&config.topic, QoS::AtMostOnce).await?;
        info!(
            server = %config.server(),
            topic = %config.topic,
            "Connected to MQTT server"
        );

        Ok(Self {
            config,
            client,
            eventloop,
            reading_tx,
            shutdown,
            backoff: ReconnectBackoff::new(RECONNECT_INITIAL, RECONNECT_MAX),
        })
    }

    /// Deliver readings until shutdown or until the monitor goes away.
    pub async fn run(mut self) {
        info!(
            topic = %self.config.topic,
            server = %self.config.server(),
            "Listening for readings"
        );

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if !forward_payload(&self.reading_tx, &publish.payload).await {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    let attempts = self.backoff.on_connected();
                    info!(server = %self.config.server(), attempts, "Reconnected to MQTT server");
                    self.resubscribe();
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = self.backoff.on_failure();
                    warn!(
                        server = %self.config.server(),
                        error = %e,
                        attempt = self.backoff.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "MQTT connection lost"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = time::sleep(delay) => {}
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect request not queued");
        }
        trace!("Feed stopped");
    }

    fn resubscribe(&self) {
        if let Err(e) = self.client.try_subscribe(&self.config.topic, QoS::AtMostOnce) {
            warn!(topic = %self.config.topic, error = %e, "Failed to renew subscription");
        }
    }
}

/// Decode and forward one payload. Returns false once the monitor has
/// stopped listening.
async fn forward_payload(reading_tx: &mpsc::Sender<Reading>, payload: &[u8]) -> bool {
    let value = match decode_payload(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                payload = %String::from_utf8_lossy(payload),
                error = %e,
                "Invalid payload"
            );
            return true;
        }
    };

    debug!(value = %value, "Reading received");
    if reading_tx.send(Reading::now(value)).await.is_err() {
        debug!("Reading channel closed");
        return false;
    }
    true
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> std::result::Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}
