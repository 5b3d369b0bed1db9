//! Butler thread configuration.

use std::time::Duration;

/// Configuration for the butler thread.
#[derive(Debug, Clone, Copy)]
pub struct ButlerConfig {
    /// Longest wait between two cache passes (default: 5ms)
    pub poll_interval: Duration,
    /// Capacity of the command channel (default: 64)
    pub command_capacity: usize,
}

impl Default for ButlerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            command_capacity: 64,
        }
    }
}

impl ButlerConfig {
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self {
            // never spin
            poll_interval: interval.max(Duration::from_millis(1)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_floor() {
        let config = ButlerConfig::with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.command_capacity, 64);
    }
}
