//! Risk level classification from SPI
//!
//! Global invariants enforced:
//! - Boundaries are fixed constants, not configurable per zone
//! - Monotonic: a lower SPI never yields a less severe level

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound (exclusive) of the MEDIUM level; SPI above this is LOW
pub const MEDIUM_LEVEL_BOUNDARY: f64 = -0.5;

/// Upper bound (inclusive) of the HIGH level
pub const HIGH_LEVEL_BOUNDARY: f64 = -1.0;

/// Upper bound (inclusive) of the CRITICAL display level.
///
/// Not the same constant as [`crate::critical::CRITICAL_SPI_THRESHOLD`], which is
/// the target used for days-to-critical estimates.
pub const CRITICAL_LEVEL_BOUNDARY: f64 = -1.5;

/// Risk level, ordered by severity (Low < Medium < High < Critical)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,      // > -0.5
    Medium,   // (-1.0, -0.5]
    High,     // (-1.5, -1.0]
    Critical, // <= -1.5
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Upper-case label used in human-readable comparisons
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Classify an SPI value into a risk level
///
/// NaN is treated as the most severe level so a broken input can never read
/// as "low risk".
pub fn classify(spi: f64) -> RiskLevel {
    if spi > MEDIUM_LEVEL_BOUNDARY {
        RiskLevel::Low
    } else if spi > HIGH_LEVEL_BOUNDARY {
        RiskLevel::Medium
    } else if spi > CRITICAL_LEVEL_BOUNDARY {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

/// Describe a transition between two levels, e.g. `CRITICAL -> HIGH`
pub fn describe_change(from: RiskLevel, to: RiskLevel) -> String {
    if from == to {
        format!("unchanged ({})", from)
    } else if to < from {
        format!("{} -> {} (improved)", from, to)
    } else {
        format!("{} -> {} (worsened)", from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(classify(0.3), RiskLevel::Low);
        assert_eq!(classify(-0.49), RiskLevel::Low);
        assert_eq!(classify(-0.5), RiskLevel::Medium);
        assert_eq!(classify(-0.99), RiskLevel::Medium);
        assert_eq!(classify(-1.0), RiskLevel::High);
        assert_eq!(classify(-1.49), RiskLevel::High);
        assert_eq!(classify(-1.5), RiskLevel::Critical);
        assert_eq!(classify(-3.2), RiskLevel::Critical);
    }

    #[test]
    fn test_monotonic_over_grid() {
        let mut previous = classify(-4.0);
        let mut spi = -4.0;
        while spi <= 4.0 {
            let level = classify(spi);
            // Higher SPI is never more severe
            assert!(level <= previous, "spi {} gave {:?} after {:?}", spi, level, previous);
            previous = level;
            spi += 0.01;
        }
    }

    #[test]
    fn test_nan_is_critical() {
        assert_eq!(classify(f64::NAN), RiskLevel::Critical);
    }

    #[test]
    fn test_describe_change() {
        assert_eq!(
            describe_change(RiskLevel::Critical, RiskLevel::High),
            "CRITICAL -> HIGH (improved)"
        );
        assert_eq!(describe_change(RiskLevel::High, RiskLevel::High), "unchanged (HIGH)");
        assert_eq!(
            describe_change(RiskLevel::Medium, RiskLevel::Critical),
            "MEDIUM -> CRITICAL (worsened)"
        );
    }
}
