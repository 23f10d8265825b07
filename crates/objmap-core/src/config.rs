//! Configuration for a replicated map handle
//!
//! Tuning knobs only — none of these affect protocol correctness. The
//! retry loops stay unbounded either way; backoff just keeps contending
//! handles from hammering the object between conflicts.

use std::time::Duration;

/// Map handle configuration.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Compaction trigger: compact when `cache size / replayed line count`
    /// drops to or below this ratio
    pub compaction_trigger_ratio: f64,
    /// First backoff delay after a compare-and-swap conflict
    pub backoff_base: Duration,
    /// Upper bound on the jittered backoff delay
    pub backoff_max: Duration,
    /// Name of the object attribute holding the current epoch
    pub epoch_attr: String,
}

impl MapConfig {
    /// Validate all configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio >= 1.0 {
            return Err("compaction_trigger_ratio must be in (0.0, 1.0)".into());
        }
        if self.backoff_base.as_nanos() == 0 {
            return Err("backoff_base must be > 0".into());
        }
        if self.backoff_max < self.backoff_base {
            return Err("backoff_max must be >= backoff_base".into());
        }
        if self.epoch_attr.is_empty() {
            return Err("epoch_attr must not be empty".into());
        }
        Ok(())
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            compaction_trigger_ratio: 0.2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(64),
            epoch_attr: "epoch".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ratio_bounds() {
        let mut config = MapConfig::default();
        config.compaction_trigger_ratio = 0.0;
        assert!(config.validate().is_err());
        config.compaction_trigger_ratio = 1.0;
        assert!(config.validate().is_err());
        config.compaction_trigger_ratio = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = MapConfig::default();
        config.backoff_max = Duration::from_micros(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_epoch_attr_must_be_named() {
        let mut config = MapConfig::default();
        config.epoch_attr = String::new();
        assert!(config.validate().is_err());
    }
}
