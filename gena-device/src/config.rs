//! Configuration for the publisher engine.

use std::time::Duration;

use crate::error::DeviceError;

/// Configuration for [`GenaDevice`](crate::GenaDevice).
///
/// Controls the event server bind range, subscription admission policy, lease
/// clamping, and delivery behavior.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Port range for the embedded event server
    /// Default: (49200, 49300)
    pub port_range: (u16, u16),

    /// Maximum concurrent subscriptions per service (None = unlimited)
    /// Default: None
    pub max_subscriptions: Option<usize>,

    /// Minimum lease granted to a subscriber, in seconds
    /// Default: 60
    pub min_subscription_timeout: u32,

    /// Maximum lease granted to a subscriber, in seconds (None = unlimited)
    /// Default: Some(7200)
    pub max_subscription_timeout: Option<u32>,

    /// Whether `Second-infinite` leases are granted; when false an infinite
    /// request is replaced with `default_timeout`
    /// Default: false
    pub allow_infinite: bool,

    /// Lease applied when the TIMEOUT header is absent or malformed, or when
    /// an infinite request is refused, in seconds
    /// Default: 1801
    pub default_timeout: u32,

    /// Bound on each NOTIFY send plus response wait
    /// Default: 30 seconds
    pub notify_timeout: Duration,

    /// Whether per-subscription wire ordering is enforced by the delivery
    /// workers (the ordering gate)
    /// Default: true
    pub ordered_delivery: bool,

    /// How often expired subscriptions are swept from the store
    /// Default: 30 seconds
    pub expiry_sweep_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port_range: (49200, 49300),
            max_subscriptions: None,
            min_subscription_timeout: 60,
            max_subscription_timeout: Some(7200),
            allow_infinite: false,
            default_timeout: 1801,
            notify_timeout: Duration::from_secs(30),
            ordered_delivery: true,
            expiry_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl DeviceConfig {
    /// Create a new DeviceConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.port_range.0 >= self.port_range.1 {
            return Err(DeviceError::Configuration(
                "Invalid port range: start must be less than end".to_string(),
            ));
        }
        if self.max_subscriptions == Some(0) {
            return Err(DeviceError::Configuration(
                "Max subscriptions must be greater than 0".to_string(),
            ));
        }
        if let Some(max) = self.max_subscription_timeout {
            if max < self.min_subscription_timeout {
                return Err(DeviceError::Configuration(
                    "Max subscription timeout must not be below the minimum".to_string(),
                ));
            }
        }
        if self.default_timeout == 0 {
            return Err(DeviceError::Configuration(
                "Default timeout must be greater than 0".to_string(),
            ));
        }
        if self.notify_timeout == Duration::ZERO {
            return Err(DeviceError::Configuration(
                "Notify timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = Some(max);
        self
    }

    pub fn with_subscription_timeouts(mut self, min: u32, max: Option<u32>) -> Self {
        self.min_subscription_timeout = min;
        self.max_subscription_timeout = max;
        self
    }

    pub fn with_infinite_leases(mut self, allowed: bool) -> Self {
        self.allow_infinite = allowed;
        self
    }

    pub fn with_ordered_delivery(mut self, ordered: bool) -> Self {
        self.ordered_delivery = ordered;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeviceConfig::default();
        assert_eq!(config.default_timeout, 1801);
        assert!(config.ordered_delivery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = DeviceConfig {
            port_range: (49300, 49200),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = DeviceConfig {
            max_subscriptions: Some(0),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = DeviceConfig {
            min_subscription_timeout: 600,
            max_subscription_timeout: Some(300),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DeviceConfig::new()
            .with_port_range(50000, 50100)
            .with_max_subscriptions(5)
            .with_subscription_timeouts(30, Some(3600))
            .with_ordered_delivery(false);

        assert_eq!(config.port_range, (50000, 50100));
        assert_eq!(config.max_subscriptions, Some(5));
        assert_eq!(config.min_subscription_timeout, 30);
        assert!(!config.ordered_delivery);
        assert!(config.validate().is_ok());
    }
}
