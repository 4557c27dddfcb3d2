//! Bounded exponential reconnect schedule.

use cockpit_core::config::TransportConfig;
use rand::Rng;
use std::time::Duration;

/// Lower bound of every reconnect delay, whatever the configuration says.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(50);

/// Reconnect delay policy: `min(base * 2^attempt, max)` plus jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added as random jitter, clamped to `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        let base = Duration::from_millis(config.reconnect_base_ms).max(MIN_RECONNECT_DELAY);
        Self {
            base,
            max: Duration::from_millis(config.reconnect_max_ms).max(base),
            jitter: config.reconnect_jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let base = self.base.max(MIN_RECONNECT_DELAY);
        base.saturating_mul(factor)
            .min(self.max.max(base))
    }

    /// Delay before reconnect attempt `attempt`, with jitter, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        base.saturating_add(Duration::from_secs_f64(extra))
            .min(self.max.max(base))
    }
}
