//! Rule evaluator: danger classification and severity for activity events.
//!
//! Pure and deterministic (no clock, no storage, no side effects). The
//! thresholds and confidence cut-points are deployment policy, so they live
//! in [`RulePolicy`] and are loaded from the environment rather than
//! hard-coded at call sites. Operators tune them per deployment.

use crate::model::{EventType, Severity};

/// Default inactivity threshold: 3 minutes.
pub const DEFAULT_INACTIVITY_THRESHOLD_MS: u64 = 180_000;

/// Default confidence above which a fall is classified as high severity.
pub const DEFAULT_FALL_HIGH_CONFIDENCE: f64 = 0.7;

/// Default confidence above which a fall is classified as critical.
pub const DEFAULT_FALL_CRITICAL_CONFIDENCE: f64 = 0.9;

/// Classification policy constants.
///
/// Note that fall severity is confidence-based while inactivity severity is
/// duration-based; the two axes do not interact. Whether they should (e.g.,
/// low-confidence long-duration inactivity) is an open tuning question, so
/// the policy keeps them independent.
#[derive(Debug, Clone, Copy)]
pub struct RulePolicy {
    /// Inactivity shorter than this is not dangerous (milliseconds).
    pub inactivity_threshold_ms: u64,
    /// Fall confidence at or above this is high severity.
    pub fall_high_confidence: f64,
    /// Fall confidence at or above this is critical severity.
    pub fall_critical_confidence: f64,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            inactivity_threshold_ms: DEFAULT_INACTIVITY_THRESHOLD_MS,
            fall_high_confidence: DEFAULT_FALL_HIGH_CONFIDENCE,
            fall_critical_confidence: DEFAULT_FALL_CRITICAL_CONFIDENCE,
        }
    }
}

impl RulePolicy {
    /// Decide whether an event warrants an alert.
    ///
    /// - A fall is always dangerous.
    /// - Inactivity is dangerous iff its duration reaches the threshold.
    /// - Normal and unknown events are never dangerous.
    pub fn is_dangerous(&self, event_type: EventType, duration_ms: u64) -> bool {
        match event_type {
            EventType::Fall => true,
            EventType::Inactivity => duration_ms >= self.inactivity_threshold_ms,
            EventType::Normal | EventType::Unknown => false,
        }
    }

    /// Compute the severity of an event.
    ///
    /// Falls grade on producer confidence; inactivity grades on duration
    /// relative to the threshold. Everything else is low.
    pub fn severity_of(&self, event_type: EventType, confidence: f64, duration_ms: u64) -> Severity {
        match event_type {
            EventType::Fall => {
                if confidence >= self.fall_critical_confidence {
                    Severity::Critical
                } else if confidence >= self.fall_high_confidence {
                    Severity::High
                } else {
                    Severity::Medium
                }
            }
            EventType::Inactivity => {
                if duration_ms >= 2 * self.inactivity_threshold_ms {
                    Severity::High
                } else if duration_ms >= self.inactivity_threshold_ms {
                    Severity::Medium
                } else {
                    Severity::Low
                }
            }
            EventType::Normal | EventType::Unknown => Severity::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fall_always_dangerous() {
        let policy = RulePolicy::default();
        assert!(policy.is_dangerous(EventType::Fall, 0));
        assert!(policy.is_dangerous(EventType::Fall, 1));
        assert!(policy.is_dangerous(EventType::Fall, u64::MAX));
    }

    #[test]
    fn test_inactivity_threshold_boundary() {
        let policy = RulePolicy::default();

        // Below the threshold: never dangerous
        assert!(!policy.is_dangerous(EventType::Inactivity, 0));
        assert!(!policy.is_dangerous(EventType::Inactivity, 179_999));

        // At and above the threshold: always dangerous
        assert!(policy.is_dangerous(EventType::Inactivity, 180_000));
        assert!(policy.is_dangerous(EventType::Inactivity, 180_001));
        assert!(policy.is_dangerous(EventType::Inactivity, 10_000_000));
    }

    #[test]
    fn test_normal_and_unknown_never_dangerous() {
        let policy = RulePolicy::default();
        assert!(!policy.is_dangerous(EventType::Normal, u64::MAX));
        assert!(!policy.is_dangerous(EventType::Unknown, u64::MAX));
    }

    #[test]
    fn test_fall_severity_cut_points() {
        let policy = RulePolicy::default();
        assert_eq!(policy.severity_of(EventType::Fall, 0.95, 0), Severity::Critical);
        assert_eq!(policy.severity_of(EventType::Fall, 0.9, 0), Severity::Critical);
        assert_eq!(policy.severity_of(EventType::Fall, 0.75, 0), Severity::High);
        assert_eq!(policy.severity_of(EventType::Fall, 0.7, 0), Severity::High);
        assert_eq!(policy.severity_of(EventType::Fall, 0.5, 0), Severity::Medium);
        assert_eq!(policy.severity_of(EventType::Fall, 0.0, 0), Severity::Medium);
    }

    #[test]
    fn test_inactivity_severity_grades_on_duration() {
        let policy = RulePolicy::default();

        // Past double the threshold: high
        assert_eq!(
            policy.severity_of(EventType::Inactivity, 1.0, 400_000),
            Severity::High
        );
        assert_eq!(
            policy.severity_of(EventType::Inactivity, 1.0, 360_000),
            Severity::High
        );

        // Between one and two thresholds: medium
        assert_eq!(
            policy.severity_of(EventType::Inactivity, 1.0, 180_000),
            Severity::Medium
        );
        assert_eq!(
            policy.severity_of(EventType::Inactivity, 1.0, 359_999),
            Severity::Medium
        );

        // Below the threshold: low
        assert_eq!(
            policy.severity_of(EventType::Inactivity, 1.0, 179_999),
            Severity::Low
        );
    }

    #[test]
    fn test_other_types_are_low_severity() {
        let policy = RulePolicy::default();
        assert_eq!(policy.severity_of(EventType::Normal, 1.0, u64::MAX), Severity::Low);
        assert_eq!(policy.severity_of(EventType::Unknown, 1.0, u64::MAX), Severity::Low);
    }

    #[test]
    fn test_custom_thresholds_are_respected() {
        let policy = RulePolicy {
            inactivity_threshold_ms: 60_000,
            fall_high_confidence: 0.5,
            fall_critical_confidence: 0.8,
        };

        assert!(policy.is_dangerous(EventType::Inactivity, 60_000));
        assert!(!policy.is_dangerous(EventType::Inactivity, 59_999));
        assert_eq!(policy.severity_of(EventType::Fall, 0.8, 0), Severity::Critical);
        assert_eq!(policy.severity_of(EventType::Fall, 0.5, 0), Severity::High);
        assert_eq!(policy.severity_of(EventType::Fall, 0.49, 0), Severity::Medium);
    }
}
