//! Per-user risk thresholds.

use serde::{Deserialize, Serialize};

/// Thresholds that decide when an account is put into cooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSettings {
    pub max_consecutive_failures: u32,
    pub cooling_duration_minutes: u32,
}

impl RiskSettings {
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
    pub const DEFAULT_COOLING_DURATION_MINUTES: u32 = 30;
    /// Inclusive (min, max).
    pub const MAX_CONSECUTIVE_FAILURES_RANGE: (u32, u32) = (1, 20);
    pub const COOLING_DURATION_MINUTES_RANGE: (u32, u32) = (5, 1440);

    /// Clamp both fields into their safe ranges. Idempotent.
    pub fn validate(&mut self) {
        let (lo, hi) = Self::MAX_CONSECUTIVE_FAILURES_RANGE;
        self.max_consecutive_failures = self.max_consecutive_failures.clamp(lo, hi);
        let (lo, hi) = Self::COOLING_DURATION_MINUTES_RANGE;
        self.cooling_duration_minutes = self.cooling_duration_minutes.clamp(lo, hi);
    }

    /// Consuming variant of [`RiskSettings::validate`].
    pub fn validated(mut self) -> Self {
        self.validate();
        self
    }

    pub fn cooling_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooling_duration_minutes))
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: Self::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            cooling_duration_minutes: Self::DEFAULT_COOLING_DURATION_MINUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_clamps_out_of_range() {
        let mut s = RiskSettings {
            max_consecutive_failures: 0,
            cooling_duration_minutes: 100_000,
        };
        s.validate();
        assert_eq!(s.max_consecutive_failures, 1);
        assert_eq!(s.cooling_duration_minutes, 1440);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut s = RiskSettings {
            max_consecutive_failures: 50,
            cooling_duration_minutes: 1,
        };
        s.validate();
        let once = s;
        s.validate();
        assert_eq!(s, once);
    }

    #[test]
    fn test_defaults_are_in_range() {
        let s = RiskSettings::default();
        assert_eq!(s.validated(), s);
    }
}
