//! Risk assessment snapshots
//!
//! Global invariants enforced:
//! - Assessments are never mutated after creation (history is append-only)
//! - Risk level is always derived from SPI by the classifier
//! - Heuristic evaluation and simulation read only the assessment itself, so
//!   everything they need (velocity, deterioration) is carried here

use crate::critical::{estimate_days_to_critical, DaysToCritical};
use crate::heuristics::{RAPID_DETERIORATION_LOOKBACK_DAYS, RAPID_DETERIORATION_MIN_DROP};
use crate::risk::{classify, RiskLevel};
use crate::trend::{Trend, TrendAnalysis};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for serialized assessments
pub const ASSESSMENT_SCHEMA_VERSION: u32 = 1;

/// Point-in-time risk assessment for a zone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RiskAssessment {
    pub schema_version: u32,
    pub zone_id: String,
    pub spi: f64,
    pub risk_level: RiskLevel,
    pub trend: Trend,
    /// SPI change per day used for extrapolation
    pub velocity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_to_critical: Option<DaysToCritical>,
    /// Relative drop of days-to-critical over the lookback window (0.25 = 25% fewer days)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deterioration: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Build an assessment from SPI and a trend velocity, without history context
    pub fn new(
        zone_id: impl Into<String>,
        spi: f64,
        trend: Trend,
        velocity: f64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        RiskAssessment {
            schema_version: ASSESSMENT_SCHEMA_VERSION,
            zone_id: zone_id.into(),
            spi,
            risk_level: classify(spi),
            trend,
            velocity,
            days_to_critical: estimate_days_to_critical(spi, velocity),
            deterioration: None,
            computed_at,
        }
    }

    /// Build an assessment from a trend analysis and prior assessments of the zone
    pub fn assess(
        zone_id: impl Into<String>,
        spi: f64,
        analysis: &TrendAnalysis,
        previous: &[RiskAssessment],
        computed_at: DateTime<Utc>,
    ) -> Self {
        let mut assessment = Self::new(zone_id, spi, analysis.trend, analysis.velocity, computed_at);
        assessment.deterioration = deterioration_over_lookback(
            assessment.days(),
            previous,
            computed_at,
        );
        assessment
    }

    /// Return a copy carrying an explicit deterioration signal
    pub fn with_deterioration(mut self, deterioration: Option<f64>) -> Self {
        self.deterioration = deterioration;
        self
    }

    /// Estimated days to critical, if any
    pub fn days(&self) -> Option<f64> {
        self.days_to_critical.map(|d| d.estimated_days)
    }

    /// Whether days-to-critical dropped past the rapid-deterioration threshold
    pub fn is_rapidly_deteriorating(&self) -> bool {
        self.deterioration
            .is_some_and(|drop| drop > RAPID_DETERIORATION_MIN_DROP)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize assessment to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let assessment: RiskAssessment =
            serde_json::from_str(json).context("failed to deserialize assessment from JSON")?;
        if assessment.schema_version != ASSESSMENT_SCHEMA_VERSION {
            anyhow::bail!(
                "schema version mismatch: expected {}, got {}",
                ASSESSMENT_SCHEMA_VERSION,
                assessment.schema_version
            );
        }
        Ok(assessment)
    }
}

/// Relative drop in days-to-critical against the oldest estimate within the lookback
///
/// The reference is the earliest prior assessment inside
/// `[now - lookback, now)` that carries a positive estimate.
pub fn deterioration_over_lookback(
    current_days: Option<f64>,
    previous: &[RiskAssessment],
    now: DateTime<Utc>,
) -> Option<f64> {
    let current = current_days?;
    let window_start = now - Duration::days(RAPID_DETERIORATION_LOOKBACK_DAYS);
    let reference = previous
        .iter()
        .filter(|a| a.computed_at >= window_start && a.computed_at < now)
        .filter_map(|a| a.days().filter(|&d| d > 0.0).map(|d| (a.computed_at, d)))
        .min_by(|a, b| a.0.cmp(&b.0))?
        .1;
    Some((reference - current) / reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap()
    }

    fn with_days(day: u32, days: f64) -> RiskAssessment {
        // velocity chosen so that SPI -1.5 reaches -2.0 in `days`
        RiskAssessment::new("z", -1.5, Trend::Worsening, -0.5 / days, at(day))
    }

    #[test]
    fn test_new_derives_level_and_days() {
        let a = RiskAssessment::new("z", -1.72, Trend::Worsening, -0.28 / 24.0, at(1));
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert!((a.days().unwrap() - 24.0).abs() < 1e-9);
        assert!(a.deterioration.is_none());
    }

    #[test]
    fn test_deterioration_uses_oldest_in_lookback() {
        let history = vec![with_days(1, 80.0), with_days(10, 40.0), with_days(20, 35.0)];
        // now = day 24 -> window starts day 10; reference is the day-10 estimate
        let drop = deterioration_over_lookback(Some(30.0), &history, at(24)).unwrap();
        assert!((drop - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_no_reference_no_signal() {
        let history = vec![with_days(1, 80.0)];
        assert!(deterioration_over_lookback(Some(30.0), &history, at(24)).is_none());
        assert!(deterioration_over_lookback(None, &[with_days(20, 40.0)], at(24)).is_none());
    }

    #[test]
    fn test_rapid_deterioration_threshold() {
        let a = RiskAssessment::new("z", -1.72, Trend::Worsening, -0.01, at(1));
        assert!(!a.clone().with_deterioration(Some(0.2)).is_rapidly_deteriorating());
        assert!(a.clone().with_deterioration(Some(0.21)).is_rapidly_deteriorating());
        assert!(!a.with_deterioration(None).is_rapidly_deteriorating());
    }

    #[test]
    fn test_json_round_trip_is_stable() {
        let a = RiskAssessment::new("z", -1.1, Trend::Stable, 0.0, at(3));
        let json = a.to_json().unwrap();
        assert_eq!(RiskAssessment::from_json(&json).unwrap(), a);
        assert!(!json.contains("days_to_critical"));
    }
}
