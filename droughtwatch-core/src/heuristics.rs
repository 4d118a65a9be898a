//! Mitigation heuristic registry and evaluator
//!
//! Evaluates the six fixed trigger rules against a risk assessment.
//!
//! Global invariants enforced:
//! - The rule set is closed (H1..H6) and loaded once at startup
//! - Evaluation order is fixed H1 -> H6
//! - Every rule is evaluated against the same assessment (no short-circuit)
//! - Evaluation is a pure function of the assessment

use crate::assessment::RiskAssessment;
use crate::trend::Trend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lookback window for the rapid-deterioration rule
pub const RAPID_DETERIORATION_LOOKBACK_DAYS: i64 = 14;

/// Relative drop in days-to-critical that activates H6
pub const RAPID_DETERIORATION_MIN_DROP: f64 = 0.20;

/// Multiplier applied once to the combined effect of the other active heuristics when H6 is active
pub const H6_PENALTY_FACTOR: f64 = 0.8;

/// Heuristic identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeuristicId {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl HeuristicId {
    pub const ALL: [HeuristicId; 6] = [
        HeuristicId::H1,
        HeuristicId::H2,
        HeuristicId::H3,
        HeuristicId::H4,
        HeuristicId::H5,
        HeuristicId::H6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HeuristicId::H1 => "H1",
            HeuristicId::H2 => "H2",
            HeuristicId::H3 => "H3",
            HeuristicId::H4 => "H4",
            HeuristicId::H5 => "H5",
            HeuristicId::H6 => "H6",
        }
    }
}

impl fmt::Display for HeuristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One side of an interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Bound {
    Unbounded,
    Inclusive(f64),
    Exclusive(f64),
}

/// Real interval used by trigger predicates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Interval {
    pub lower: Bound,
    pub upper: Bound,
}

impl Interval {
    pub const fn new(lower: Bound, upper: Bound) -> Self {
        Interval { lower, upper }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above = match self.lower {
            Bound::Unbounded => true,
            Bound::Inclusive(lo) => value >= lo,
            Bound::Exclusive(lo) => value > lo,
        };
        let below = match self.upper {
            Bound::Unbounded => true,
            Bound::Inclusive(hi) => value <= hi,
            Bound::Exclusive(hi) => value < hi,
        };
        above && below
    }
}

/// Trigger predicate of a heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Trigger {
    /// Conjunction over SPI range, trend set and (optional) days-to-critical range.
    /// A days range never matches an assessment without an estimate.
    Conditions {
        spi: Interval,
        trends: Vec<Trend>,
        days: Option<Interval>,
    },
    /// Days-to-critical dropped by more than `min_drop` within the lookback
    RapidDeterioration { min_drop: f64, lookback_days: i64 },
}

impl Trigger {
    pub fn matches(&self, assessment: &RiskAssessment) -> bool {
        match self {
            Trigger::Conditions { spi, trends, days } => {
                spi.contains(assessment.spi)
                    && trends.contains(&assessment.trend)
                    && match days {
                        None => true,
                        Some(range) => assessment.days().is_some_and(|d| range.contains(d)),
                    }
            }
            Trigger::RapidDeterioration { min_drop, .. } => {
                assessment.deterioration.is_some_and(|drop| drop > *min_drop)
            }
        }
    }
}

/// Fixed mitigation heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Heuristic {
    pub id: HeuristicId,
    pub name: String,
    pub trigger: Trigger,
    /// 1 = most urgent
    pub priority: u8,
    pub action_codes: Vec<String>,
}

/// Heuristic activated for an assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActivatedHeuristic {
    pub heuristic_id: HeuristicId,
    pub name: String,
    pub priority: u8,
    pub candidate_actions: Vec<String>,
}

/// Evaluate every heuristic in fixed order
///
/// The registry is sorted by id first, so callers cannot change evaluation order.
pub fn evaluate(heuristics: &[Heuristic], assessment: &RiskAssessment) -> Vec<ActivatedHeuristic> {
    let mut ordered: Vec<&Heuristic> = heuristics.iter().collect();
    ordered.sort_by_key(|h| h.id);

    let activated: Vec<ActivatedHeuristic> = ordered
        .into_iter()
        .filter(|h| h.trigger.matches(assessment))
        .map(|h| ActivatedHeuristic {
            heuristic_id: h.id,
            name: h.name.clone(),
            priority: h.priority,
            candidate_actions: h.action_codes.clone(),
        })
        .collect();

    tracing::debug!(
        zone = %assessment.zone_id,
        activated = ?activated.iter().map(|a| a.heuristic_id).collect::<Vec<_>>(),
        "evaluated heuristics"
    );
    activated
}

/// Whether the H6 penalty applies to this activation set
pub fn penalty_active(activated: &[ActivatedHeuristic]) -> bool {
    activated.iter().any(|a| a.heuristic_id == HeuristicId::H6)
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

/// The six built-in heuristics
pub fn builtin_heuristics() -> Vec<Heuristic> {
    use Bound::{Exclusive, Inclusive, Unbounded};

    vec![
        Heuristic {
            id: HeuristicId::H1,
            name: "Early warning and awareness".to_string(),
            trigger: Trigger::Conditions {
                spi: Interval::new(Exclusive(-1.0), Inclusive(-0.5)),
                trends: vec![Trend::Stable, Trend::Worsening],
                days: None,
            },
            priority: 5,
            action_codes: codes(&["A01", "A02"]),
        },
        Heuristic {
            id: HeuristicId::H2,
            name: "Voluntary demand management".to_string(),
            trigger: Trigger::Conditions {
                spi: Interval::new(Exclusive(-1.5), Inclusive(-1.0)),
                trends: vec![Trend::Stable, Trend::Worsening],
                days: None,
            },
            priority: 4,
            action_codes: codes(&["A03", "A04", "A05"]),
        },
        Heuristic {
            id: HeuristicId::H3,
            name: "Supply augmentation".to_string(),
            trigger: Trigger::Conditions {
                spi: Interval::new(Unbounded, Inclusive(-1.0)),
                trends: vec![Trend::Worsening],
                days: Some(Interval::new(Inclusive(30.0), Inclusive(90.0))),
            },
            priority: 3,
            action_codes: codes(&["A06", "A07", "A08"]),
        },
        Heuristic {
            id: HeuristicId::H4,
            name: "Restriction of non-essential uses".to_string(),
            trigger: Trigger::Conditions {
                spi: Interval::new(Inclusive(-2.0), Inclusive(-1.5)),
                trends: vec![Trend::Worsening],
                days: Some(Interval::new(Inclusive(0.0), Inclusive(30.0))),
            },
            priority: 2,
            action_codes: codes(&["A09", "A10", "A11"]),
        },
        Heuristic {
            id: HeuristicId::H5,
            name: "Emergency supply protection".to_string(),
            trigger: Trigger::Conditions {
                spi: Interval::new(Unbounded, Inclusive(-1.5)),
                trends: vec![Trend::Worsening],
                days: Some(Interval::new(Inclusive(0.0), Exclusive(14.0))),
            },
            priority: 1,
            action_codes: codes(&["A12", "A13"]),
        },
        Heuristic {
            id: HeuristicId::H6,
            name: "Rapid deterioration".to_string(),
            trigger: Trigger::RapidDeterioration {
                min_drop: RAPID_DETERIORATION_MIN_DROP,
                lookback_days: RAPID_DETERIORATION_LOOKBACK_DAYS,
            },
            priority: 1,
            action_codes: codes(&["A14", "A15"]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn assessment(spi: f64, trend: Trend, days: Option<f64>) -> RiskAssessment {
        let velocity = match days {
            Some(d) if d > 0.0 => -(spi + 2.0) / d,
            _ => 0.0,
        };
        RiskAssessment::new(
            "z",
            spi,
            trend,
            velocity,
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        )
    }

    fn ids(activated: &[ActivatedHeuristic]) -> Vec<HeuristicId> {
        activated.iter().map(|a| a.heuristic_id).collect()
    }

    #[test]
    fn test_reference_case_activates_h4_only() {
        let a = assessment(-1.72, Trend::Worsening, Some(24.0));
        assert!((a.days().unwrap() - 24.0).abs() < 1e-9);
        let activated = evaluate(&builtin_heuristics(), &a);
        assert_eq!(ids(&activated), vec![HeuristicId::H4]);
        assert_eq!(activated[0].candidate_actions, vec!["A09", "A10", "A11"]);
    }

    #[test]
    fn test_multiple_heuristics_activate_together() {
        // SPI -1.6, worsening, 10 days: H4 (days <= 30) and H5 (days < 14)
        let a = assessment(-1.6, Trend::Worsening, Some(10.0));
        let activated = evaluate(&builtin_heuristics(), &a);
        assert_eq!(ids(&activated), vec![HeuristicId::H4, HeuristicId::H5]);
    }

    #[test]
    fn test_h6_is_evaluated_alongside_others() {
        let a = assessment(-1.72, Trend::Worsening, Some(24.0)).with_deterioration(Some(0.35));
        let activated = evaluate(&builtin_heuristics(), &a);
        assert_eq!(ids(&activated), vec![HeuristicId::H4, HeuristicId::H6]);
        assert!(penalty_active(&activated));
    }

    #[test]
    fn test_days_range_requires_estimate() {
        // Worsening label but no estimate -> H3/H4/H5 cannot match
        let a = assessment(-1.7, Trend::Worsening, None);
        assert!(a.days().is_none());
        assert!(evaluate(&builtin_heuristics(), &a).is_empty());
    }

    #[test]
    fn test_early_warning_and_demand_management() {
        let h1 = evaluate(&builtin_heuristics(), &assessment(-0.7, Trend::Stable, None));
        assert_eq!(ids(&h1), vec![HeuristicId::H1]);
        let h2 = evaluate(&builtin_heuristics(), &assessment(-1.2, Trend::Stable, None));
        assert_eq!(ids(&h2), vec![HeuristicId::H2]);
        let none = evaluate(&builtin_heuristics(), &assessment(-0.7, Trend::Improving, None));
        assert!(none.is_empty());
    }

    #[test]
    fn test_supply_augmentation_window() {
        let a = assessment(-1.2, Trend::Worsening, Some(60.0));
        assert_eq!(
            ids(&evaluate(&builtin_heuristics(), &a)),
            vec![HeuristicId::H2, HeuristicId::H3]
        );
    }

    #[test]
    fn test_evaluation_order_independent_of_registry_order() {
        let mut reversed = builtin_heuristics();
        reversed.reverse();
        let a = assessment(-1.6, Trend::Worsening, Some(10.0)).with_deterioration(Some(0.5));
        assert_eq!(
            evaluate(&reversed, &a),
            evaluate(&builtin_heuristics(), &a)
        );
    }

    #[test]
    fn test_interval_bounds() {
        let i = Interval::new(Bound::Exclusive(-1.0), Bound::Inclusive(-0.5));
        assert!(!i.contains(-1.0));
        assert!(i.contains(-0.5));
        assert!(i.contains(-0.75));
        assert!(!i.contains(-0.4));
    }
}
