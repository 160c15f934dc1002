//! Effective scaling policy for one resource.

use std::time::Duration;

use capscale_core::{EngineConfig, ScalingBehavior};

/// Hysteresis parameters the decision engine applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    /// Fraction by which the utilization ratio must exceed 1.0 before
    /// scaling up.
    pub scale_up_margin: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl ScalingPolicy {
    /// Engine-wide defaults.
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            scale_up_cooldown: config.scale_up_cooldown,
            scale_down_cooldown: config.scale_down_cooldown,
            scale_up_margin: config.scale_up_margin,
        }
    }

    /// Apply per-resource overrides; absent fields keep the engine value.
    pub fn with_overrides(mut self, behavior: Option<&ScalingBehavior>) -> Self {
        let Some(behavior) = behavior else {
            return self;
        };
        if let Some(d) = behavior.scale_up_cooldown {
            self.scale_up_cooldown = d.into();
        }
        if let Some(d) = behavior.scale_down_cooldown {
            self.scale_down_cooldown = d.into();
        }
        if let Some(margin) = behavior.scale_up_margin {
            self.scale_up_margin = margin;
        }
        self
    }
}
