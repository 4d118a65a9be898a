//! Candidate parameterization with deterministic fallback
//!
//! Global invariants enforced:
//! - A provider never introduces an action; it only parameterizes a candidate
//! - Parameters are clamped against the action schema for every method
//! - Any provider failure or invalid output takes the fallback branch, once
//! - Candidate order is preserved through parallel parameterization

use crate::ai::{AiPrompt, AiProvider, Method};
use crate::assessment::RiskAssessment;
use crate::catalog::{BaseAction, Catalog, Parameters};
use crate::error::{CoreError, Result};
use crate::heuristics::HeuristicId;
use crate::ranking::RankedCandidate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on justification length, in characters
pub const MAX_JUSTIFICATION_CHARS: usize = 600;

/// Estimated benefit of one action instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExpectedEffect {
    pub days_gained: f64,
    pub confidence: f64,
    pub formula: String,
}

/// Why the fallback branch was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FallbackReason {
    /// Provider errored, timed out or is disabled
    ProviderError(String),
    /// Provider replied but the reply failed validation
    InvalidOutput(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::ProviderError(msg) => write!(f, "provider error: {}", msg),
            FallbackReason::InvalidOutput(msg) => write!(f, "invalid output: {}", msg),
        }
    }
}

/// Validated provider output
#[derive(Debug, Clone, PartialEq)]
pub struct AiOutput {
    pub parameters: Parameters,
    pub justification: String,
}

/// Concrete, parameterized recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionInstance {
    pub instance_id: Uuid,
    pub action_code: String,
    pub heuristic_id: HeuristicId,
    pub title: String,
    pub parameters: Parameters,
    pub justification: String,
    pub expected_effect: ExpectedEffect,
    pub duration_days: f64,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub priority_score: f64,
}

/// Parameterizes ranked candidates through an [`AiProvider`]
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn AiProvider>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Orchestrator { provider }
    }

    /// Parameterize every candidate in parallel, preserving order
    pub fn parameterize_all(
        &self,
        catalog: &Catalog,
        candidates: &[RankedCandidate],
        assessment: &RiskAssessment,
    ) -> Result<Vec<ActionInstance>> {
        candidates
            .par_iter()
            .map(|candidate| self.parameterize(catalog, candidate, assessment))
            .collect()
    }

    /// Parameterize one candidate
    pub fn parameterize(
        &self,
        catalog: &Catalog,
        candidate: &RankedCandidate,
        assessment: &RiskAssessment,
    ) -> Result<ActionInstance> {
        let action = catalog.action(&candidate.action_code).ok_or_else(|| {
            CoreError::Catalog(format!("candidate {} not in catalog", candidate.action_code))
        })?;

        let (output, method, fallback_reason) = match self.request(action, assessment) {
            Ok(output) => (output, self.provider.method(), None),
            Err(reason) => {
                tracing::warn!(
                    zone = %assessment.zone_id,
                    action = %action.code,
                    %reason,
                    "using fallback parameters"
                );
                (fallback_output(action, assessment), Method::Fallback, Some(reason))
            }
        };

        let parameters = action.schema.clamp(&output.parameters);
        let expected_effect = ExpectedEffect {
            days_gained: action.impact.days_gained(&parameters),
            confidence: action.confidence,
            formula: action.impact.render(),
        };

        Ok(ActionInstance {
            instance_id: Uuid::new_v4(),
            action_code: action.code.clone(),
            heuristic_id: action.heuristic_id,
            title: action.title.clone(),
            duration_days: action.duration_days(&parameters),
            parameters,
            justification: bound_justification(&output.justification),
            expected_effect,
            method,
            fallback_reason,
            priority_score: candidate.priority_score,
        })
    }

    /// One bounded provider attempt followed by strict validation
    fn request(
        &self,
        action: &BaseAction,
        assessment: &RiskAssessment,
    ) -> std::result::Result<AiOutput, FallbackReason> {
        let schema = response_schema(action);
        let prompt = build_prompt(action, assessment);
        let reply = self
            .provider
            .call_ai(&prompt, &schema)
            .map_err(|e| FallbackReason::ProviderError(e.to_string()))?;
        parse_output(action, &reply).map_err(|e| {
            tracing::warn!(action = %action.code, error = %e, "rejected provider output");
            FallbackReason::InvalidOutput(e.to_string())
        })
    }
}

/// Schema the provider must answer with
pub fn response_schema(action: &BaseAction) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["parameters", "justification"],
        "properties": {
            "parameters": action.schema.to_json_schema(),
            "justification": {"type": "string", "maxLength": MAX_JUSTIFICATION_CHARS},
        },
    })
}

pub fn build_prompt(action: &BaseAction, assessment: &RiskAssessment) -> AiPrompt {
    let system = "You parameterize drought mitigation actions for water authorities. \
                  Choose values strictly inside the given schema and justify them in at most \
                  three sentences. Never propose a different action."
        .to_string();

    let days = assessment
        .days()
        .map(|d| format!("{:.0} days", d))
        .unwrap_or_else(|| "no estimate".to_string());
    let user = format!(
        "Zone: {zone}\nSPI: {spi:.2} ({level})\nTrend: {trend} ({velocity:.4} SPI/day)\n\
         Estimated days to critical: {days}\n\nAction {code}: {title}\n{description}\n\
         Documented impact: {formula}",
        zone = assessment.zone_id,
        spi = assessment.spi,
        level = assessment.risk_level,
        trend = assessment.trend,
        velocity = assessment.velocity,
        days = days,
        code = action.code,
        title = action.title,
        description = action.description,
        formula = action.impact.render(),
    );

    AiPrompt {
        action_code: action.code.clone(),
        system,
        user,
    }
}

/// Strictly validate a provider reply
pub fn parse_output(action: &BaseAction, reply: &Value) -> Result<AiOutput> {
    let invalid = |parameter: &str, reason: &str| CoreError::InvalidParameter {
        action_code: action.code.clone(),
        parameter: parameter.to_string(),
        reason: reason.to_string(),
    };

    let object = reply
        .as_object()
        .ok_or_else(|| invalid("<root>", "reply must be a JSON object"))?;
    if let Some(extra) = object
        .keys()
        .find(|k| k.as_str() != "parameters" && k.as_str() != "justification")
    {
        return Err(invalid(extra, "not declared in schema"));
    }

    let parameters = object
        .get("parameters")
        .ok_or_else(|| invalid("parameters", "missing"))?;
    let parameters = action.schema.validate_json(&action.code, parameters)?;

    let justification = object
        .get("justification")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("justification", "missing or not a non-empty string"))?;

    Ok(AiOutput {
        parameters,
        justification: justification.to_string(),
    })
}

/// Documented defaults with a templated justification
pub fn fallback_output(action: &BaseAction, assessment: &RiskAssessment) -> AiOutput {
    let days = match assessment.days() {
        Some(d) => format!("an estimated {:.0} days to critical", d),
        None => "no days-to-critical estimate".to_string(),
    };
    let justification = format!(
        "{} with documented default parameters. Zone {} is at SPI {:.2} ({}), trend {}, \
         with {}. Expected effect {}.",
        action.title,
        assessment.zone_id,
        assessment.spi,
        assessment.risk_level,
        assessment.trend,
        days,
        action.impact.render(),
    );
    AiOutput {
        parameters: action.schema.defaults(),
        justification,
    }
}

/// Trim and bound a justification to [`MAX_JUSTIFICATION_CHARS`]
pub fn bound_justification(text: &str) -> String {
    text.trim().chars().take(MAX_JUSTIFICATION_CHARS).collect()
}
