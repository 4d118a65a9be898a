//! Scenario simulation - acting versus not acting
//!
//! Projects SPI forward from an assessment along its current velocity and
//! compares against the same projection with action effects applied.
//!
//! Global invariants enforced:
//! - Results are pure functions of (assessment, actions, projection_days)
//! - Zero actions produce a with-action scenario identical to no-action
//! - Effects are additive; the H6 penalty is applied once per action
//! - An action delays the crossing by exactly its effective gain, whatever its duration
//! - Days-to-critical is the exact crossing of the piecewise-linear curve, and is
//!   withheld inside the trend dead-band like the estimator does

use crate::assessment::RiskAssessment;
use crate::critical::CRITICAL_SPI_THRESHOLD;
use crate::error::{CoreError, Result};
use crate::heuristics::{HeuristicId, H6_PENALTY_FACTOR};
use crate::orchestrator::ActionInstance;
use crate::risk::{classify, describe_change, RiskLevel};
use crate::trend::TREND_EPSILON;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_PROJECTION_DAYS: u32 = 1;
pub const MAX_PROJECTION_DAYS: u32 = 365;
pub const DEFAULT_PROJECTION_DAYS: u32 = 90;

/// Drying rate assumed for effects when the zone is not currently drying (SPI/day)
pub const REFERENCE_DRYING_VELOCITY: f64 = 0.01;

/// Display clamp for projected SPI
pub const SPI_DISPLAY_MIN: f64 = -3.5;
pub const SPI_DISPLAY_MAX: f64 = 3.5;

/// One projected day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrajectoryPoint {
    pub day: u32,
    pub projected_spi: f64,
    pub risk_level: RiskLevel,
    pub improvement_applied: bool,
}

/// Projection under one set of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Scenario {
    pub ending_spi: f64,
    pub ending_risk_level: RiskLevel,
    pub days_to_critical: Option<f64>,
    pub trajectory: Vec<TrajectoryPoint>,
}

/// Difference between the two scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Comparison {
    pub days_gained: f64,
    pub spi_improvement: f64,
    pub risk_level_change: String,
    pub actions_count: usize,
    pub h6_penalty_applied: bool,
}

/// Effect of one action as applied by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppliedAction {
    pub instance_id: Uuid,
    pub action_code: String,
    pub heuristic_id: HeuristicId,
    /// Days gained after any penalty
    pub effective_days_gained: f64,
    pub duration_days: f64,
    pub penalized: bool,
}

/// Terminal artifact of a simulation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulationResult {
    pub zone_id: String,
    pub projection_days: u32,
    pub no_action: Scenario,
    pub with_action: Scenario,
    pub comparison: Comparison,
    pub actions_applied: Vec<AppliedAction>,
}

impl SimulationResult {
    pub fn to_json(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        serde_json::to_string_pretty(self).context("failed to serialize simulation to JSON")
    }
}

/// Action in force during `[0, duration)`, accruing its SPI offset at a
/// constant rate during `[0, window)`
#[derive(Debug, Clone, Copy)]
struct Effect {
    rate: f64,
    window: f64,
    duration: f64,
}

impl Effect {
    /// Spread `gain` days of drying over the action's duration, cut short at
    /// the no-action crossing so the whole offset lands before it
    fn new(gain: f64, drying: f64, duration: f64, baseline_crossing: Option<f64>) -> Self {
        let window = match baseline_crossing {
            Some(t) if t > 0.0 => duration.min(t),
            _ => duration,
        };
        Effect {
            rate: gain * drying / window,
            window,
            duration,
        }
    }
}

/// Piecewise-linear SPI projection
#[derive(Debug, Clone)]
struct Projection {
    start: f64,
    velocity: f64,
    effects: Vec<Effect>,
}

impl Projection {
    fn spi_at(&self, t: f64) -> f64 {
        self.start
            + self.velocity * t
            + self
                .effects
                .iter()
                .map(|e| e.rate * t.min(e.window))
                .sum::<f64>()
    }

    fn active_at(&self, t: f64) -> bool {
        self.effects.iter().any(|e| t < e.duration)
    }

    /// First time the curve reaches the critical threshold
    fn crossing(&self) -> Option<f64> {
        let target = CRITICAL_SPI_THRESHOLD;
        if self.start <= target {
            return Some(0.0);
        }
        if self.velocity >= -TREND_EPSILON {
            return None;
        }

        let mut breakpoints: Vec<f64> = self.effects.iter().map(|e| e.window).collect();
        breakpoints.sort_by(f64::total_cmp);
        breakpoints.dedup();

        let mut t0 = 0.0;
        let mut value = self.start;
        for end in breakpoints.into_iter().map(Some).chain(std::iter::once(None)) {
            let slope = self.velocity
                + self
                    .effects
                    .iter()
                    .filter(|e| e.window > t0)
                    .map(|e| e.rate)
                    .sum::<f64>();
            if slope < 0.0 {
                let t = t0 + (value - target) / -slope;
                if end.map_or(true, |end| t <= end) {
                    return Some(t);
                }
            }
            let Some(end) = end else {
                return None;
            };
            value = self.spi_at(end);
            t0 = end;
        }
        None
    }

    fn scenario(&self, projection_days: u32) -> Scenario {
        let trajectory: Vec<TrajectoryPoint> = (0..=projection_days)
            .map(|day| {
                let t = f64::from(day);
                let projected_spi = self.spi_at(t).clamp(SPI_DISPLAY_MIN, SPI_DISPLAY_MAX);
                TrajectoryPoint {
                    day,
                    projected_spi,
                    risk_level: classify(projected_spi),
                    improvement_applied: self.active_at(t),
                }
            })
            .collect();
        let ending_spi = self.spi_at(f64::from(projection_days));
        Scenario {
            ending_spi,
            ending_risk_level: classify(ending_spi),
            days_to_critical: self.crossing(),
            trajectory,
        }
    }
}

/// Effective days gained for one action under the H6 rule
fn effective_gain(action: &ActionInstance, h6_active: bool) -> (f64, bool) {
    let penalized = h6_active && action.heuristic_id != HeuristicId::H6;
    let gain = action.expected_effect.days_gained;
    if penalized {
        (gain * H6_PENALTY_FACTOR, true)
    } else {
        (gain, false)
    }
}

/// Simulate no-action and with-action scenarios
pub fn simulate_scenarios(
    assessment: &RiskAssessment,
    actions: &[ActionInstance],
    projection_days: u32,
) -> Result<SimulationResult> {
    if !(MIN_PROJECTION_DAYS..=MAX_PROJECTION_DAYS).contains(&projection_days) {
        return Err(CoreError::SimulationRange {
            requested: projection_days,
            min: MIN_PROJECTION_DAYS,
            max: MAX_PROJECTION_DAYS,
        });
    }

    let velocity = assessment.velocity;
    let drying = if velocity < 0.0 {
        velocity.abs()
    } else {
        REFERENCE_DRYING_VELOCITY
    };
    let h6_active = assessment.is_rapidly_deteriorating();

    let baseline = Projection {
        start: assessment.spi,
        velocity,
        effects: Vec::new(),
    };
    let baseline_crossing = baseline.crossing();

    let mut applied = Vec::with_capacity(actions.len());
    let mut effects = Vec::with_capacity(actions.len());
    for action in actions {
        let (gain, penalized) = effective_gain(action, h6_active);
        let duration = action.duration_days;
        if duration > 0.0 && gain.is_finite() {
            effects.push(Effect::new(gain, drying, duration, baseline_crossing));
        } else {
            tracing::warn!(action = %action.action_code, duration, "ignoring action without a usable duration");
        }
        applied.push(AppliedAction {
            instance_id: action.instance_id,
            action_code: action.action_code.clone(),
            heuristic_id: action.heuristic_id,
            effective_days_gained: gain,
            duration_days: duration,
            penalized,
        });
    }

    let mitigated = Projection {
        effects,
        ..baseline.clone()
    };

    let no_action = baseline.scenario(projection_days);
    let with_action = mitigated.scenario(projection_days);

    let days_gained = match (with_action.days_to_critical, no_action.days_to_critical) {
        (Some(with), Some(without)) => with - without,
        _ => 0.0,
    };
    let comparison = Comparison {
        days_gained,
        spi_improvement: with_action.ending_spi - no_action.ending_spi,
        risk_level_change: describe_change(no_action.ending_risk_level, with_action.ending_risk_level),
        actions_count: actions.len(),
        h6_penalty_applied: applied.iter().any(|a| a.penalized),
    };

    tracing::debug!(
        zone = %assessment.zone_id,
        projection_days,
        actions = actions.len(),
        days_gained,
        "simulated scenarios"
    );

    Ok(SimulationResult {
        zone_id: assessment.zone_id.clone(),
        projection_days,
        no_action,
        with_action,
        comparison,
        actions_applied: applied,
    })
}
