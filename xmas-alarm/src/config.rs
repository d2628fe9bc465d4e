//! Runtime configuration from environment variables.
//!
//! | Variable               | Default               |
//! |------------------------|-----------------------|
//! | `MQTT_SERVER`          | `192.168.1.2`         |
//! | `MQTT_PORT`            | `1883`                |
//! | `MQTT_TOPIC`           | `xmas/tree/water/raw` |
//! | `MQTT_CLIENT_ID`       | `xmas-alarm`          |
//! | `MQTT_CONNECT_TIMEOUT` | `10` (seconds)        |
//! | `THRESHOLD`            | `60.0`                |
//! | `ALARM_PERIOD`         | `90` (seconds)        |
//! | `NODATA_TIMEOUT`       | `300` (seconds)       |
//! | `TICK_INTERVAL_MS`     | `1000`                |
//! | `SIGNAL_TIMEOUT`       | `5` (seconds)         |
//! | `TWINKLY_HOST`         | unset, broadcast      |
//! | `TEST_MODE`            | `0`, `1` enables      |
//!
//! Empty values count as unset. Anything else that fails to parse is an
//! error; the process refuses to start rather than guess.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::alarm::AlarmConfig;
use crate::error::{Error, Result};
use crate::feed::FeedConfig;
use crate::signal::TwinklyConfig;
use crate::tracing::prelude::*;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub alarm: AlarmConfig,
    pub signal: TwinklyConfig,

    /// Watchdog tick period.
    pub tick_interval: Duration,

    /// Cycle colors forever instead of monitoring.
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            alarm: AlarmConfig::default(),
            signal: TwinklyConfig::default(),
            tick_interval: Duration::from_millis(1000),
            test_mode: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Config::default();

        let feed = FeedConfig {
            host: vars.string("MQTT_SERVER").unwrap_or(defaults.feed.host),
            port: vars.parse("MQTT_PORT")?.unwrap_or(defaults.feed.port),
            topic: vars.string("MQTT_TOPIC").unwrap_or(defaults.feed.topic),
            client_id: vars
                .string("MQTT_CLIENT_ID")
                .unwrap_or(defaults.feed.client_id),
            connect_timeout: vars
                .secs("MQTT_CONNECT_TIMEOUT")?
                .unwrap_or(defaults.feed.connect_timeout),
        };

        let threshold: f64 = vars
            .parse("THRESHOLD")?
            .unwrap_or(defaults.alarm.threshold);
        if !threshold.is_finite() {
            return Err(Error::Config(format!(
                "THRESHOLD must be a finite number, got {threshold}"
            )));
        }

        let alarm = AlarmConfig {
            threshold,
            alarm_period: vars
                .secs("ALARM_PERIOD")?
                .unwrap_or(defaults.alarm.alarm_period),
            nodata_timeout: positive(
                "NODATA_TIMEOUT",
                vars.secs("NODATA_TIMEOUT")?
                    .unwrap_or(defaults.alarm.nodata_timeout),
            )?,
        };

        let signal = TwinklyConfig {
            host: vars.string("TWINKLY_HOST"),
            timeout: positive(
                "SIGNAL_TIMEOUT",
                vars.secs("SIGNAL_TIMEOUT")?
                    .unwrap_or(defaults.signal.timeout),
            )?,
        };

        let tick_interval = positive(
            "TICK_INTERVAL_MS",
            vars.parse("TICK_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
        )?;

        let test_mode = vars.parse::<u8>("TEST_MODE")?.is_some_and(|v| v == 1);

        Ok(Self {
            feed,
            alarm,
            signal,
            tick_interval,
            test_mode,
        })
    }

    /// Log the effective configuration, one field per line.
    pub fn log_summary(&self) {
        info!(server = %self.feed.server(), "MQTT server");
        info!(topic = %self.feed.topic, client_id = %self.feed.client_id, "MQTT subscription");
        info!(threshold = %self.alarm.threshold, "Threshold");
        info!(alarm_period_s = self.alarm.alarm_period.as_secs(), "Alarm period");
        info!(nodata_timeout_s = self.alarm.nodata_timeout.as_secs(), "No-data timeout");
        info!(tick_interval_ms = self.tick_interval.as_millis() as u64, "Watchdog tick");
        match &self.signal.host {
            Some(host) => info!(host = %host, "Twinkly host"),
            None => info!("Twinkly host discovered by broadcast"),
        }
        if self.test_mode {
            warn!("Test mode enabled, cycling colors instead of monitoring");
        }
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}")))
            })
            .transpose()
    }

    fn secs(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }
}

fn positive(name: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(Error::Config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();

        assert_eq!(config.feed.host, "192.168.1.2");
        assert_eq!(config.feed.port, 1883);
        assert_eq!(config.feed.topic, "xmas/tree/water/raw");
        assert_eq!(config.feed.client_id, "xmas-alarm");
        assert_eq!(config.alarm.threshold, 60.0);
        assert_eq!(config.alarm.alarm_period, Duration::from_secs(90));
        assert_eq!(config.alarm.nodata_timeout, Duration::from_secs(300));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.signal.host, None);
        assert!(!config.test_mode);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("MQTT_SERVER", "broker.lan"),
            ("MQTT_PORT", "1884"),
            ("MQTT_TOPIC", "garden/pond/level"),
            ("THRESHOLD", "42.5"),
            ("ALARM_PERIOD", "30"),
            ("NODATA_TIMEOUT", "600"),
            ("TICK_INTERVAL_MS", "250"),
            ("TWINKLY_HOST", "10.0.0.7"),
            ("TEST_MODE", "1"),
        ])
        .unwrap();

        assert_eq!(config.feed.server(), "broker.lan:1884");
        assert_eq!(config.feed.topic, "garden/pond/level");
        assert_eq!(config.alarm.threshold, 42.5);
        assert_eq!(config.alarm.alarm_period, Duration::from_secs(30));
        assert_eq!(config.alarm.nodata_timeout, Duration::from_secs(600));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.signal.host.as_deref(), Some("10.0.0.7"));
        assert!(config.test_mode);
    }

    #[test]
    fn empty_value_means_default() {
        let config = load(&[("MQTT_SERVER", ""), ("THRESHOLD", "  ")]).unwrap();
        assert_eq!(config.feed.host, "192.168.1.2");
        assert_eq!(config.alarm.threshold, 60.0);
    }

    #[test]
    fn zero_alarm_period_is_allowed() {
        let config = load(&[("ALARM_PERIOD", "0")]).unwrap();
        assert_eq!(config.alarm.alarm_period, Duration::ZERO);
    }

    #[test_case("0", false; "zero")]
    #[test_case("1", true; "one")]
    #[test_case("2", false; "other number")]
    fn test_mode_only_for_one(value: &str, expected: bool) {
        assert_eq!(load(&[("TEST_MODE", value)]).unwrap().test_mode, expected);
    }

    #[test_case("THRESHOLD", "wet"; "threshold not a number")]
    #[test_case("THRESHOLD", "NaN"; "threshold nan")]
    #[test_case("THRESHOLD", "inf"; "threshold infinite")]
    #[test_case("MQTT_PORT", "70000"; "port out of range")]
    #[test_case("ALARM_PERIOD", "-5"; "negative period")]
    #[test_case("NODATA_TIMEOUT", "0"; "zero nodata timeout")]
    #[test_case("TICK_INTERVAL_MS", "0"; "zero tick")]
    #[test_case("SIGNAL_TIMEOUT", "0"; "zero signal timeout")]
    #[test_case("TEST_MODE", "yes"; "test mode not a number")]
    fn rejects_invalid_values(name: &str, value: &str) {
        let err = load(&[(name, value)]).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert!(err.to_string().contains(name), "{err}");
    }
}
