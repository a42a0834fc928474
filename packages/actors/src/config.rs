//! Runner pool tuning.

use std::time::Duration;

use crate::ActorError;

/// How many runners poll the scheduler and how often they talk to it.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Runners started by the supervisor; each runs one job at a time.
    pub runners: usize,
    /// Idle runners ask for work this often.
    pub poll_interval: Duration,
    /// Busy runners report liveness this often.
    pub heartbeat_interval: Duration,
    /// Bound on a runner's job request round-trip.
    pub request_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runners: 1,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    /// Read `HARVEST_RUNNERS`, `HARVEST_POLL_INTERVAL_MS` and
    /// `HARVEST_HEARTBEAT_SECS`.
    pub fn from_env() -> Result<Self, ActorError> {
        let defaults = Self::default();
        Ok(Self {
            runners: parse::<usize>("HARVEST_RUNNERS")?
                .unwrap_or(defaults.runners)
                .max(1),
            poll_interval: parse::<u64>("HARVEST_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            heartbeat_interval: parse::<u64>("HARVEST_HEARTBEAT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            request_timeout: defaults.request_timeout,
        })
    }

    /// A runner silent for this long is reported as stalled.
    pub fn stall_after(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

fn parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ActorError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ActorError::Config(format!("{name} is not a valid number: {raw}"))),
        _ => Ok(None),
    }
}
