use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    /// Readings at or above this value count toward the threshold alarm.
    pub threshold: f64,

    /// How long readings must stay at or above `threshold`, without a
    /// single reading below it, before the threshold alarm is raised.
    pub alarm_period: Duration,

    /// Silence alarm is raised once no reading has arrived for this long.
    pub nodata_timeout: Duration,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            threshold: 60.0,
            alarm_period: Duration::from_secs(90),
            nodata_timeout: Duration::from_secs(300),
        }
    }
}
