use std::time::Duration;

use msconfig::Config;
use tracing::warn;

/// Tunables of a [`Station`](crate::Station).
///
/// The defaults are the production values; tests shorten the timings.
#[derive(Debug, Clone)]
pub struct StationOptions {
    /// Concurrent sessions allowed per output stream.
    pub max_listeners: usize,
    /// Chunks buffered per listener session.
    pub session_capacity: usize,
    /// Messages buffered between the producer and the pacer.
    pub buffering_capacity: usize,
    /// 20 ms windows of silence pushed before and after each track.
    pub silence_windows: usize,
    /// How far ahead of wall-clock time chunks are released.
    pub pacing_lead: Duration,
    /// Skips are refused this long after a track started.
    pub skip_guard: Duration,
    /// Standby is entered after this long without listener activity.
    pub inactivity_timeout: Duration,
    /// Period of the "listeners are still here" tick.
    pub listener_tick: Duration,
    /// Consecutive failed playbacks before the scheduler gives up.
    pub watchdog_max_failures: usize,
    /// Heroku application kept awake while listeners are connected.
    pub self_ping_app: Option<String>,
    pub self_ping_interval: Duration,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            max_listeners: 250,
            session_capacity: 500,
            buffering_capacity: 5000,
            silence_windows: 35,
            pacing_lead: Duration::from_millis(40),
            skip_guard: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(15 * 60),
            listener_tick: Duration::from_secs(60),
            watchdog_max_failures: 5,
            self_ping_app: None,
            self_ping_interval: Duration::from_secs(60),
        }
    }
}

impl StationOptions {
    /// Reads the `stream.*` and `host.self_ping.*` settings.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();

        let max_listeners = config.get_max_listeners().unwrap_or_else(|e| {
            warn!("stream.max_listeners: {}, using {}", e, defaults.max_listeners);
            defaults.max_listeners
        });
        let inactivity = config
            .get_inactivity_timeout_secs()
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(defaults.inactivity_timeout);
        let skip_guard = config
            .get_skip_guard_secs()
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(defaults.skip_guard);
        let watchdog = config
            .get_watchdog_max_failures()
            .unwrap_or(defaults.watchdog_max_failures);

        Self {
            max_listeners: max_listeners.max(1),
            skip_guard,
            inactivity_timeout: inactivity,
            watchdog_max_failures: watchdog.max(1),
            self_ping_app: config.get_self_ping_app_name(),
            ..defaults
        }
    }
}
