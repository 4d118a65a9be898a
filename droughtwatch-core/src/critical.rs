//! Days-to-critical estimation by linear extrapolation
//!
//! The result is always an estimate, never a measured fact. Stable or improving
//! conditions produce no estimate rather than a very large number.

use crate::trend::TREND_EPSILON;
use serde::{Deserialize, Serialize};

/// SPI level targeted by the days-to-critical estimate and the simulator.
///
/// Intentionally separate from [`crate::risk::CRITICAL_LEVEL_BOUNDARY`] (-1.5),
/// which only drives the displayed risk level.
pub const CRITICAL_SPI_THRESHOLD: f64 = -2.0;

/// How the estimate was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    LinearExtrapolation,
}

/// Estimated time until SPI crosses the critical threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DaysToCritical {
    pub estimated_days: f64,
    pub threshold_spi: f64,
    pub method: EstimateMethod,
}

impl DaysToCritical {
    pub fn new(estimated_days: f64) -> Self {
        DaysToCritical {
            estimated_days,
            threshold_spi: CRITICAL_SPI_THRESHOLD,
            method: EstimateMethod::LinearExtrapolation,
        }
    }
}

/// Estimate days until `spi` reaches [`CRITICAL_SPI_THRESHOLD`] at `velocity` SPI/day
///
/// Returns `None` when velocity is not worsening beyond the trend dead-band.
pub fn estimate_days_to_critical(spi: f64, velocity: f64) -> Option<DaysToCritical> {
    if !spi.is_finite() || !velocity.is_finite() {
        return None;
    }
    if spi <= CRITICAL_SPI_THRESHOLD {
        return Some(DaysToCritical::new(0.0));
    }
    if velocity >= -TREND_EPSILON {
        return None;
    }
    Some(DaysToCritical::new(
        (spi - CRITICAL_SPI_THRESHOLD) / velocity.abs(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_extrapolation() {
        let estimate = estimate_days_to_critical(-1.72, -0.28 / 24.0).unwrap();
        assert!((estimate.estimated_days - 24.0).abs() < 1e-9);
        assert_eq!(estimate.threshold_spi, CRITICAL_SPI_THRESHOLD);
        assert_eq!(estimate.method, EstimateMethod::LinearExtrapolation);
    }

    #[test]
    fn test_stable_or_improving_has_no_estimate() {
        assert!(estimate_days_to_critical(-1.2, 0.0).is_none());
        assert!(estimate_days_to_critical(-1.2, 0.05).is_none());
        assert!(estimate_days_to_critical(-1.2, -TREND_EPSILON / 2.0).is_none());
    }

    #[test]
    fn test_already_critical_is_zero() {
        let estimate = estimate_days_to_critical(-2.3, 0.01).unwrap();
        assert_eq!(estimate.estimated_days, 0.0);
    }

    #[test]
    fn test_thresholds_are_distinct() {
        assert_ne!(CRITICAL_SPI_THRESHOLD, crate::risk::CRITICAL_LEVEL_BOUNDARY);
    }
}
