//! Profile-weighted ranking of candidate actions
//!
//! Turns activated heuristics into an ordered, deduplicated candidate list.
//! Parameter values are not chosen here.

use crate::catalog::{BaseAction, Catalog, BASE_ACTION_COUNT};
use crate::heuristics::{ActivatedHeuristic, HeuristicId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Requester's decision lens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Government,
    Industry,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Government => "government",
            Profile::Industry => "industry",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "government" => Ok(Profile::Government),
            "industry" => Ok(Profile::Industry),
            other => Err(format!(
                "unknown profile '{}' (expected government or industry)",
                other
            )),
        }
    }
}

/// Weights for computing an action's priority score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileWeights {
    pub urgency: f64,
    pub impact: f64,
    pub cost: f64,
    pub feasibility: f64,
    pub equity: f64,
}

impl ProfileWeights {
    /// Built-in weights for a profile
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Government => ProfileWeights {
                urgency: 0.35,
                impact: 0.2,
                cost: 0.1,
                feasibility: 0.1,
                equity: 0.25,
            },
            Profile::Industry => ProfileWeights {
                urgency: 0.15,
                impact: 0.2,
                cost: 0.3,
                feasibility: 0.3,
                equity: 0.05,
            },
        }
    }

    pub fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("urgency", self.urgency),
            ("impact", self.impact),
            ("cost", self.cost),
            ("feasibility", self.feasibility),
            ("equity", self.equity),
        ]
    }
}

/// Breakdown of a priority score (unweighted components)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ScoreFactors {
    pub urgency: f64,
    pub impact: f64,
    /// 1 - cost, so cheaper actions score higher
    pub affordability: f64,
    pub feasibility: f64,
    pub equity: f64,
}

/// Candidate selected for parameterization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RankedCandidate {
    pub action_code: String,
    pub heuristic_id: HeuristicId,
    pub priority: u8,
    pub priority_score: f64,
    pub factors: ScoreFactors,
}

/// Urgency from heuristic priority (1 is most urgent)
pub fn urgency(priority: u8) -> f64 {
    (1.0 - (f64::from(priority.max(1)) - 1.0) / 5.0).max(0.0)
}

/// Score one base action under a heuristic priority
pub fn compute_priority_score(
    action: &BaseAction,
    priority: u8,
    max_base_days: f64,
    weights: &ProfileWeights,
) -> (f64, ScoreFactors) {
    let impact = if max_base_days > 0.0 {
        action.impact.base_days / max_base_days
    } else {
        0.0
    };

    let factors = ScoreFactors {
        urgency: urgency(priority),
        impact,
        affordability: 1.0 - action.cost,
        feasibility: action.feasibility,
        equity: action.equity,
    };

    let score = weights.urgency * factors.urgency
        + weights.impact * factors.impact
        + weights.cost * factors.affordability
        + weights.feasibility * factors.feasibility
        + weights.equity * factors.equity;

    (score, factors)
}

/// Rank every candidate action of the activated heuristics
///
/// Codes missing from the catalog are skipped. When a code appears more than
/// once the highest-scoring entry is kept.
pub fn rank_candidates(
    catalog: &Catalog,
    activated: &[ActivatedHeuristic],
    weights: &ProfileWeights,
) -> Vec<RankedCandidate> {
    let max_base_days = catalog.max_base_days();
    let mut best: BTreeMap<&str, RankedCandidate> = BTreeMap::new();

    for heuristic in activated {
        for code in &heuristic.candidate_actions {
            let Some(action) = catalog.action(code) else {
                tracing::warn!(action = %code, heuristic = %heuristic.heuristic_id, "candidate not in catalog");
                continue;
            };
            let (priority_score, factors) =
                compute_priority_score(action, heuristic.priority, max_base_days, weights);
            let candidate = RankedCandidate {
                action_code: action.code.clone(),
                heuristic_id: heuristic.heuristic_id,
                priority: heuristic.priority,
                priority_score,
                factors,
            };
            match best.get(action.code.as_str()) {
                Some(existing) if existing.priority_score >= priority_score => {}
                _ => {
                    best.insert(action.code.as_str(), candidate);
                }
            }
        }
    }

    let mut ranked: Vec<RankedCandidate> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then_with(|| a.action_code.cmp(&b.action_code))
    });
    ranked.truncate(BASE_ACTION_COUNT);
    ranked
}
