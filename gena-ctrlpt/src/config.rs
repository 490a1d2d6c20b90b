//! Configuration for the control point.

use std::time::Duration;

use crate::error::CtrlptError;

/// Configuration for [`GenaControlPoint`](crate::GenaControlPoint).
#[derive(Debug, Clone)]
pub struct CtrlptConfig {
    /// Port range for the embedded NOTIFY listener
    /// Default: (49400, 49500)
    pub port_range: (u16, u16),

    /// Bound on each outbound HTTP request
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Lease requested when the caller does not name one, in seconds
    /// Default: 1801
    pub default_timeout: u32,

    /// Floor applied to the granted lease when scheduling renewals. Publishers
    /// occasionally grant absurdly short leases; scheduling below this would
    /// turn renewal into a busy loop.
    /// Default: 15
    pub min_subscription_time: u32,

    /// How long before expiry the auto-renewal fires, in seconds
    /// Default: 10
    pub renew_margin: u32,

    /// Whether leases are renewed automatically. When off, a lease running
    /// out is reported as an expiration instead.
    /// Default: true
    pub auto_renew: bool,

    /// How many times an initial-event NOTIFY with an unknown SID is re-tried
    /// against the subscription table before being refused. Covers the window
    /// between the publisher sending its initial event and the subscribe
    /// response being processed.
    /// Default: 5
    pub race_retry_attempts: u32,

    /// Pause between those retries
    /// Default: 100 milliseconds
    pub race_retry_delay: Duration,
}

impl Default for CtrlptConfig {
    fn default() -> Self {
        Self {
            port_range: (49400, 49500),
            request_timeout: Duration::from_secs(30),
            default_timeout: 1801,
            min_subscription_time: 15,
            renew_margin: 10,
            auto_renew: true,
            race_retry_attempts: 5,
            race_retry_delay: Duration::from_millis(100),
        }
    }
}

impl CtrlptConfig {
    /// Create a new CtrlptConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), CtrlptError> {
        if self.port_range.0 >= self.port_range.1 {
            return Err(CtrlptError::Configuration(
                "Invalid port range: start must be less than end".to_string(),
            ));
        }
        if self.request_timeout == Duration::ZERO {
            return Err(CtrlptError::Configuration(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.default_timeout == 0 {
            return Err(CtrlptError::Configuration(
                "Default timeout must be greater than 0".to_string(),
            ));
        }
        if self.renew_margin >= self.min_subscription_time {
            return Err(CtrlptError::Configuration(
                "Renew margin must be below the minimum subscription time".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_auto_renew(mut self, enabled: bool) -> Self {
        self.auto_renew = enabled;
        self
    }

    pub fn with_default_timeout(mut self, seconds: u32) -> Self {
        self.default_timeout = seconds;
        self
    }

    pub fn with_renewal_timings(mut self, min_subscription_time: u32, renew_margin: u32) -> Self {
        self.min_subscription_time = min_subscription_time;
        self.renew_margin = renew_margin;
        self
    }
}
