//! Trend semantics - direction and velocity of SPI change
//!
//! Global invariants enforced:
//! - Input is ordered oldest first; velocities are SPI units per day
//! - Short-term reading wins when short and long term disagree
//! - Trends are derived, not stored

use crate::error::{CoreError, Result};
use crate::spi::SpiPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dead-band around zero slope (SPI per day)
pub const TREND_EPSILON: f64 = 0.002;

/// Points used for the short-term slope
pub const SHORT_TERM_POINTS: usize = 3;

/// Points used for the long-term slope
pub const LONG_TERM_POINTS: usize = 12;

/// Direction of risk change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Worsening => "worsening",
        }
    }

    /// Classify a velocity with the fixed dead-band
    pub fn from_velocity(velocity: f64) -> Self {
        if velocity > TREND_EPSILON {
            Trend::Improving
        } else if velocity < -TREND_EPSILON {
            Trend::Worsening
        } else {
            Trend::Stable
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_uppercase())
    }
}

/// Velocity reading over one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrendReading {
    pub velocity: f64,
    pub direction: Trend,
    pub points: usize,
}

/// Complete trend analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrendAnalysis {
    /// Reported trend (short-term on disagreement)
    pub trend: Trend,
    /// Raw velocity for downstream estimation (SPI per day)
    pub velocity: f64,
    pub short_term: TrendReading,
    pub long_term: TrendReading,
}

/// Analyze an ordered SPI history (oldest first, at least two points)
pub fn analyze_trend(zone_id: &str, history: &[SpiPoint]) -> Result<TrendAnalysis> {
    if history.len() < 2 {
        return Err(CoreError::InsufficientData {
            zone_id: zone_id.to_string(),
            reason: "trend needs at least two SPI values".to_string(),
            available: history.len(),
            required: 2,
        });
    }

    let short_term = reading(tail(history, SHORT_TERM_POINTS));
    let long_term = reading(tail(history, LONG_TERM_POINTS));

    Ok(TrendAnalysis {
        trend: short_term.direction,
        velocity: short_term.velocity,
        short_term,
        long_term,
    })
}

fn tail(history: &[SpiPoint], n: usize) -> &[SpiPoint] {
    &history[history.len().saturating_sub(n)..]
}

fn reading(points: &[SpiPoint]) -> TrendReading {
    let velocity = least_squares_slope(points);
    TrendReading {
        velocity,
        direction: Trend::from_velocity(velocity),
        points: points.len(),
    }
}

/// Least-squares slope of SPI over elapsed days from the first point
///
/// Returns 0.0 when all points share a date.
pub fn least_squares_slope(points: &[SpiPoint]) -> f64 {
    let Some(first) = points.first() else {
        return 0.0;
    };
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.date - first.date).num_days() as f64)
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.spi).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, p) in xs.iter().zip(points) {
        covariance += (x - mean_x) * (p.spi - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance <= f64::EPSILON {
        0.0
    } else {
        covariance / variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn points(values: &[f64], spacing_days: i64) -> Vec<SpiPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &spi)| SpiPoint {
                date: start + chrono::Duration::days(i as i64 * spacing_days),
                spi,
            })
            .collect()
    }

    #[test]
    fn test_requires_two_points() {
        let result = analyze_trend("z", &points(&[-1.0], 30));
        assert!(matches!(result, Err(CoreError::InsufficientData { .. })));
    }

    #[test]
    fn test_exact_linear_slope() {
        let history = points(&[0.0, -0.3, -0.6, -0.9], 30);
        let analysis = analyze_trend("z", &history).unwrap();
        assert!((analysis.velocity + 0.01).abs() < 1e-12);
        assert_eq!(analysis.trend, Trend::Worsening);
    }

    #[test]
    fn test_dead_band_is_stable() {
        // 0.03 SPI over 30 days = 0.001/day, inside the dead-band
        let history = points(&[-1.0, -1.03], 30);
        let analysis = analyze_trend("z", &history).unwrap();
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn test_short_term_wins_on_disagreement() {
        // Long decline followed by a sharp recent recovery
        let mut values: Vec<f64> = (0..10).map(|i| -0.2 * i as f64).collect();
        values.extend([-1.2, -0.6]);
        let history = points(&values, 30);
        let analysis = analyze_trend("z", &history).unwrap();
        assert_eq!(analysis.long_term.direction, Trend::Worsening);
        assert_eq!(analysis.short_term.direction, Trend::Improving);
        assert_eq!(analysis.trend, Trend::Improving);
        assert_eq!(analysis.velocity, analysis.short_term.velocity);
    }

    #[test]
    fn test_window_sizes() {
        let history = points(&[0.0; 20], 30);
        let analysis = analyze_trend("z", &history).unwrap();
        assert_eq!(analysis.short_term.points, SHORT_TERM_POINTS);
        assert_eq!(analysis.long_term.points, LONG_TERM_POINTS);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn test_same_date_points_have_zero_slope() {
        let history = points(&[-1.0, -2.0], 0);
        assert_eq!(least_squares_slope(&history), 0.0);
    }
}
