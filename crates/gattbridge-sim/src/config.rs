//! Simulation timing and limits

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by the simulated devices
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationConfig {
    /// Delay before a simulated device answers a command
    pub handling_delay: Duration,
    /// Delay of each connect and disconnect transition
    pub connection_delay: Duration,
    /// How long an ATT request waits for a response before it fails with
    /// `RequestTimeout`. Defaults to the 30 second ATT transaction timeout.
    pub request_timeout: Duration,
    /// Interval of the default advertiser
    pub advertising_interval: Duration,
    /// Maximum write length reported for both write types
    pub maximum_write_length: usize,
    /// Buffer size of the in-memory pipe behind each L2CAP channel
    pub channel_buffer_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            handling_delay: Duration::from_secs(1),
            connection_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            advertising_interval: Duration::from_secs(1),
            maximum_write_length: 512,
            channel_buffer_size: 4096,
        }
    }
}

impl SimulationConfig {
    /// Create a configuration with the default timings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command handling delay
    pub fn with_handling_delay(mut self, delay: Duration) -> Self {
        self.handling_delay = delay;
        self
    }

    /// Set the connect/disconnect delay
    pub fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Set the ATT request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default advertising interval
    pub fn with_advertising_interval(mut self, interval: Duration) -> Self {
        self.advertising_interval = interval;
        self
    }

    /// Set the maximum write length
    pub fn with_maximum_write_length(mut self, length: usize) -> Self {
        self.maximum_write_length = length;
        self
    }

    /// Set the L2CAP pipe buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_controller_timings() {
        let config = SimulationConfig::default();
        assert_eq!(config.handling_delay, Duration::from_secs(1));
        assert_eq!(config.connection_delay, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.maximum_write_length, 512);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SimulationConfig::new()
            .with_handling_delay(Duration::from_millis(10))
            .with_request_timeout(Duration::from_secs(2))
            .with_maximum_write_length(20);

        assert_eq!(config.handling_delay, Duration::from_millis(10));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.maximum_write_length, 20);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }
}
