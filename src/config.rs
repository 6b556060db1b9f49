//! Configuration types for the relay.

use std::time::Duration;

/// Configuration for the virtual sink and the session lifecycle.
///
/// Use [`RelayConfig::default()`] for the controller speaker profile, or
/// customize as needed.
///
/// # Example
///
/// ```
/// use sbc_relay::RelayConfig;
/// use std::time::Duration;
///
/// let config = RelayConfig {
///     sink_name: "ds4_speaker".to_string(),
///     retry_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Name of the null sink to create. Must be unique on the server.
    ///
    /// Default: `ds4`
    pub sink_name: String,

    /// Description shown for the sink in mixers.
    ///
    /// Default: `DualShock 4`
    pub sink_description: String,

    /// Sample rate the sink is created with.
    ///
    /// Default: 32000
    pub sample_rate: u32,

    /// Name of the record stream on the sink's monitor.
    ///
    /// Default: `sbc-relay`
    pub stream_name: String,

    /// Delay before reconnecting after the server connection fails.
    ///
    /// Default: 1 second
    pub retry_delay: Duration,

    /// Target latency used to size capture fragments.
    ///
    /// The server may raise it under load.
    /// Default: 5ms
    pub fragment_latency: Duration,

    /// How long [`RelayHandle::stop()`](crate::RelayHandle::stop) waits for the
    /// server to confirm the sink module was unloaded.
    ///
    /// Default: 2 seconds
    pub unload_timeout: Duration,

    /// Longest a single destination write may take before it is abandoned.
    ///
    /// Default: 50ms
    pub write_timeout: Duration,

    /// How long a failed record stream waits for the connection itself to
    /// be reported lost. A stream failure that is not followed by a
    /// connection loss within this window ends the session.
    ///
    /// Default: 500ms
    pub stream_failure_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sink_name: "ds4".to_string(),
            sink_description: "DualShock 4".to_string(),
            sample_rate: 32000,
            stream_name: "sbc-relay".to_string(),
            retry_delay: Duration::from_secs(1),
            fragment_latency: Duration::from_millis(5),
            unload_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_millis(50),
            stream_failure_grace: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.sink_name, "ds4");
        assert_eq!(config.sink_description, "DualShock 4");
        assert_eq!(config.sample_rate, 32000);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.fragment_latency, Duration::from_millis(5));
        assert_eq!(config.unload_timeout, Duration::from_secs(2));
        assert_eq!(config.write_timeout, Duration::from_millis(50));
        assert_eq!(config.stream_failure_grace, Duration::from_millis(500));
    }
}
