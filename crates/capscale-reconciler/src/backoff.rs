//! Exponential backoff for failed passes.

use std::time::Duration;

use capscale_core::EngineConfig;

/// Retry delay that doubles with every consecutive failure, up to a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap)
    }

    /// Delay before retrying after `failures` consecutive failures
    /// (`base * 2^(failures - 1)`, capped). Zero failures means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base.saturating_mul(factor).min(self.cap)
    }
}
