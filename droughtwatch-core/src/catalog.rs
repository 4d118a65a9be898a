//! Heuristic and base-action catalogs
//!
//! Loaded once at startup into an immutable `Catalog` that every computation
//! borrows. Parameter schemas bound what any parameterization path may choose.
//!
//! Global invariants enforced:
//! - Exactly six heuristics and fifteen base actions
//! - Every base action belongs to exactly one heuristic
//! - Schema defaults lie within their own bounds
//! - Parameters leaving this module are always inside the schema

use crate::error::{CoreError, Result};
use crate::heuristics::{builtin_heuristics, Heuristic, HeuristicId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Number of heuristics in a valid catalog
pub const HEURISTIC_COUNT: usize = 6;

/// Number of base actions in a valid catalog
pub const BASE_ACTION_COUNT: usize = 15;

/// Name of the parameter every action uses for its active duration
pub const DURATION_PARAMETER: &str = "duration_days";

/// Chosen parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(f64),
    Choice(String),
}

impl ParameterValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(n) => Some(*n),
            ParameterValue::Choice(_) => None,
        }
    }
}

/// Parameter values keyed by name (ordered for deterministic output)
pub type Parameters = BTreeMap<String, ParameterValue>;

/// Allowed values of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ParameterKind {
    Range {
        min: f64,
        max: f64,
        default: f64,
        unit: String,
        integer: bool,
    },
    Choice {
        options: Vec<String>,
        default: String,
    },
}

/// Named parameter in a base action's schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn default_value(&self) -> ParameterValue {
        match &self.kind {
            ParameterKind::Range { default, .. } => ParameterValue::Number(*default),
            ParameterKind::Choice { default, .. } => ParameterValue::Choice(default.clone()),
        }
    }

    /// Whether a value lies inside this parameter's bounds
    pub fn admits(&self, value: &ParameterValue) -> bool {
        match (&self.kind, value) {
            (
                ParameterKind::Range {
                    min, max, integer, ..
                },
                ParameterValue::Number(n),
            ) => n.is_finite() && *n >= *min && *n <= *max && (!integer || n.fract() == 0.0),
            (ParameterKind::Choice { options, .. }, ParameterValue::Choice(s)) => {
                options.contains(s)
            }
            _ => false,
        }
    }

    /// Force a value inside the bounds; unusable values fall back to the default
    pub fn clamp(&self, value: Option<&ParameterValue>) -> ParameterValue {
        match (&self.kind, value) {
            (
                ParameterKind::Range {
                    min, max, integer, ..
                },
                Some(ParameterValue::Number(n)),
            ) if n.is_finite() => {
                let clamped = n.clamp(*min, *max);
                let clamped = if *integer {
                    clamped.round().clamp(min.ceil(), max.floor())
                } else {
                    clamped
                };
                ParameterValue::Number(clamped)
            }
            (ParameterKind::Choice { options, .. }, Some(ParameterValue::Choice(s)))
                if options.contains(s) =>
            {
                ParameterValue::Choice(s.clone())
            }
            _ => self.default_value(),
        }
    }

    fn json_schema(&self) -> Value {
        match &self.kind {
            ParameterKind::Range {
                min,
                max,
                unit,
                integer,
                ..
            } => json!({
                "type": if *integer { "integer" } else { "number" },
                "minimum": min,
                "maximum": max,
                "description": format!("{} ({})", self.description, unit),
            }),
            ParameterKind::Choice { options, .. } => json!({
                "type": "string",
                "enum": options,
                "description": self.description,
            }),
        }
    }
}

/// Declared parameter schema of a base action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ParameterSchema {
    pub fields: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn field(&self, name: &str) -> Option<&ParameterSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Documented default for every field
    pub fn defaults(&self) -> Parameters {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default_value()))
            .collect()
    }

    /// Whether every field is present and within bounds, with no extras
    pub fn contains(&self, params: &Parameters) -> bool {
        params.len() == self.fields.len()
            && self
                .fields
                .iter()
                .all(|f| params.get(&f.name).is_some_and(|v| f.admits(v)))
    }

    /// Clamp a parameter set into the schema (drops unknown names, fills missing ones)
    pub fn clamp(&self, params: &Parameters) -> Parameters {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.clamp(params.get(&f.name))))
            .collect()
    }

    /// Strictly validate untrusted JSON against the schema
    ///
    /// Unknown fields, missing fields, wrong types and out-of-range values are
    /// all rejected; nothing is silently repaired here.
    pub fn validate_json(&self, action_code: &str, value: &Value) -> Result<Parameters> {
        let invalid = |parameter: &str, reason: String| CoreError::InvalidParameter {
            action_code: action_code.to_string(),
            parameter: parameter.to_string(),
            reason,
        };
        let object = value
            .as_object()
            .ok_or_else(|| invalid("<root>", "parameters must be a JSON object".to_string()))?;

        for key in object.keys() {
            if self.field(key).is_none() {
                return Err(invalid(key, "not declared in schema".to_string()));
            }
        }

        let mut params = Parameters::new();
        for spec in &self.fields {
            let raw = object
                .get(&spec.name)
                .ok_or_else(|| invalid(&spec.name, "missing".to_string()))?;
            let parsed = match (&spec.kind, raw) {
                (ParameterKind::Range { .. }, Value::Number(n)) => n
                    .as_f64()
                    .map(ParameterValue::Number)
                    .ok_or_else(|| invalid(&spec.name, format!("not representable: {}", n)))?,
                (ParameterKind::Choice { .. }, Value::String(s)) => ParameterValue::Choice(s.clone()),
                (_, other) => return Err(invalid(&spec.name, format!("wrong type: {}", other))),
            };
            if !spec.admits(&parsed) {
                return Err(invalid(&spec.name, format!("outside schema: {}", raw)));
            }
            params.insert(spec.name.clone(), parsed);
        }
        Ok(params)
    }

    /// JSON schema handed to the AI provider
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.json_schema()))
            .collect();
        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": required,
            "properties": properties,
        })
    }
}

/// Linear scaling of an impact by one parameter relative to a reference value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImpactScale {
    pub parameter: String,
    pub reference: f64,
}

/// Documented impact: days gained before the critical threshold is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImpactFormula {
    pub base_days: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ImpactScale>,
}

impl ImpactFormula {
    /// Days gained for a parameter set (scale parameter missing = unscaled)
    pub fn days_gained(&self, params: &Parameters) -> f64 {
        match &self.scale {
            None => self.base_days,
            Some(scale) => {
                let value = params
                    .get(&scale.parameter)
                    .and_then(ParameterValue::as_number)
                    .unwrap_or(scale.reference);
                self.base_days * value / scale.reference
            }
        }
    }

    /// Human-readable formula, e.g. `+19 days` or `+9 days x (reduction_pct / 10)`
    pub fn render(&self) -> String {
        match &self.scale {
            None => format!("+{} days", self.base_days),
            Some(scale) => format!(
                "+{} days x ({} / {})",
                self.base_days, scale.parameter, scale.reference
            ),
        }
    }
}

/// Fixed mitigation measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BaseAction {
    pub code: String,
    pub title: String,
    pub description: String,
    pub heuristic_id: HeuristicId,
    pub schema: ParameterSchema,
    pub impact: ImpactFormula,
    /// Documented confidence in the impact estimate (0..1)
    pub confidence: f64,
    /// Relative cost (0 = negligible, 1 = very expensive)
    pub cost: f64,
    /// Implementation feasibility (0..1)
    pub feasibility: f64,
    /// Equity of burden distribution (0..1)
    pub equity: f64,
}

impl BaseAction {
    /// Active duration in days for a parameter set
    pub fn duration_days(&self, params: &Parameters) -> f64 {
        params
            .get(DURATION_PARAMETER)
            .and_then(ParameterValue::as_number)
            .or_else(|| {
                self.schema
                    .field(DURATION_PARAMETER)
                    .and_then(|f| f.default_value().as_number())
            })
            .unwrap_or(0.0)
    }
}

/// Immutable catalog shared by every computation
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    heuristics: Vec<Heuristic>,
    actions: Vec<BaseAction>,
}

impl Catalog {
    /// Load and validate the built-in catalog
    pub fn load() -> Result<Self> {
        Self::from_parts(load_heuristics(), load_base_actions())
    }

    /// Validate externally supplied catalogs
    pub fn from_parts(mut heuristics: Vec<Heuristic>, mut actions: Vec<BaseAction>) -> Result<Self> {
        heuristics.sort_by_key(|h| h.id);
        actions.sort_by(|a, b| a.code.cmp(&b.code));
        validate_catalog(&heuristics, &actions)?;
        Ok(Catalog {
            heuristics,
            actions,
        })
    }

    pub fn heuristics(&self) -> &[Heuristic] {
        &self.heuristics
    }

    pub fn actions(&self) -> &[BaseAction] {
        &self.actions
    }

    pub fn action(&self, code: &str) -> Option<&BaseAction> {
        self.actions.iter().find(|a| a.code == code)
    }

    pub fn heuristic(&self, id: HeuristicId) -> Option<&Heuristic> {
        self.heuristics.iter().find(|h| h.id == id)
    }

    /// Largest documented base impact (used to normalize ranking)
    pub fn max_base_days(&self) -> f64 {
        self.actions
            .iter()
            .map(|a| a.impact.base_days)
            .fold(0.0, f64::max)
    }
}

fn validate_catalog(heuristics: &[Heuristic], actions: &[BaseAction]) -> Result<()> {
    let fail = |msg: String| Err(CoreError::Catalog(msg));

    let ids: BTreeSet<HeuristicId> = heuristics.iter().map(|h| h.id).collect();
    if heuristics.len() != HEURISTIC_COUNT || ids.len() != HEURISTIC_COUNT {
        return fail(format!(
            "expected {} distinct heuristics, got {}",
            HEURISTIC_COUNT,
            heuristics.len()
        ));
    }
    let codes: BTreeSet<&str> = actions.iter().map(|a| a.code.as_str()).collect();
    if actions.len() != BASE_ACTION_COUNT || codes.len() != BASE_ACTION_COUNT {
        return fail(format!(
            "expected {} distinct base actions, got {}",
            BASE_ACTION_COUNT,
            actions.len()
        ));
    }

    let mut referenced: BTreeMap<&str, HeuristicId> = BTreeMap::new();
    for heuristic in heuristics {
        for code in &heuristic.action_codes {
            let Some(action) = actions.iter().find(|a| &a.code == code) else {
                return fail(format!("{} references unknown action {}", heuristic.id, code));
            };
            if action.heuristic_id != heuristic.id {
                return fail(format!(
                    "{} lists {} which belongs to {}",
                    heuristic.id, code, action.heuristic_id
                ));
            }
            if referenced.insert(code.as_str(), heuristic.id).is_some() {
                return fail(format!("action {} listed by more than one heuristic", code));
            }
        }
    }

    for action in actions {
        if !referenced.contains_key(action.code.as_str()) {
            return fail(format!("action {} is not reachable from any heuristic", action.code));
        }
        if action.schema.field(DURATION_PARAMETER).is_none() {
            return fail(format!("action {} has no {}", action.code, DURATION_PARAMETER));
        }
        if !action.schema.contains(&action.schema.defaults()) {
            return fail(format!("action {} has defaults outside its schema", action.code));
        }
        if !(action.impact.base_days.is_finite() && action.impact.base_days >= 0.0) {
            return fail(format!("action {} has a negative or non-finite impact", action.code));
        }
        if let Some(scale) = &action.impact.scale {
            if scale.reference <= 0.0 || action.schema.field(&scale.parameter).is_none() {
                return fail(format!("action {} has an invalid impact scale", action.code));
            }
        }
        for (name, value) in [
            ("confidence", action.confidence),
            ("cost", action.cost),
            ("feasibility", action.feasibility),
            ("equity", action.equity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("action {} has {} outside 0..1", action.code, name));
            }
        }
    }
    Ok(())
}

/// Built-in heuristics
pub fn load_heuristics() -> Vec<Heuristic> {
    builtin_heuristics()
}

fn range(name: &str, description: &str, min: f64, max: f64, default: f64, unit: &str) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        description: description.to_string(),
        kind: ParameterKind::Range {
            min,
            max,
            default,
            unit: unit.to_string(),
            integer: false,
        },
    }
}

fn integer(name: &str, description: &str, min: f64, max: f64, default: f64, unit: &str) -> ParameterSpec {
    let mut spec = range(name, description, min, max, default, unit);
    if let ParameterKind::Range { integer, .. } = &mut spec.kind {
        *integer = true;
    }
    spec
}

fn choice(name: &str, description: &str, options: &[&str], default: &str) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        description: description.to_string(),
        kind: ParameterKind::Choice {
            options: options.iter().map(|o| o.to_string()).collect(),
            default: default.to_string(),
        },
    }
}

fn duration(min: f64, max: f64, default: f64) -> ParameterSpec {
    integer(
        DURATION_PARAMETER,
        "Days the measure stays in force",
        min,
        max,
        default,
        "days",
    )
}

fn scaled(base_days: f64, parameter: &str, reference: f64) -> ImpactFormula {
    ImpactFormula {
        base_days,
        scale: Some(ImpactScale {
            parameter: parameter.to_string(),
            reference,
        }),
    }
}

fn fixed(base_days: f64) -> ImpactFormula {
    ImpactFormula {
        base_days,
        scale: None,
    }
}

struct ActionDef {
    code: &'static str,
    title: &'static str,
    description: &'static str,
    heuristic_id: HeuristicId,
    fields: Vec<ParameterSpec>,
    impact: ImpactFormula,
    // confidence, cost, feasibility, equity
    profile: [f64; 4],
}

/// Built-in catalog of fifteen base actions
pub fn load_base_actions() -> Vec<BaseAction> {
    use HeuristicId::*;

    let defs = vec![
        ActionDef {
            code: "A01",
            title: "Public water-awareness campaign",
            description: "Communicate drought status and household saving measures",
            heuristic_id: H1,
            fields: vec![
                duration(14.0, 120.0, 60.0),
                choice(
                    "channel",
                    "Primary outreach channel",
                    &["radio", "social_media", "multichannel"],
                    "multichannel",
                ),
            ],
            impact: fixed(4.0),
            profile: [0.5, 0.15, 0.95, 0.8],
        },
        ActionDef {
            code: "A02",
            title: "Enhanced hydrological monitoring",
            description: "Densify gauge readings and publish reservoir levels",
            heuristic_id: H1,
            fields: vec![
                duration(30.0, 180.0, 90.0),
                integer(
                    "reporting_interval_days",
                    "Days between published status reports",
                    1.0,
                    14.0,
                    7.0,
                    "days",
                ),
            ],
            impact: fixed(2.0),
            profile: [0.6, 0.2, 0.9, 0.5],
        },
        ActionDef {
            code: "A03",
            title: "Voluntary consumption reduction target",
            description: "Ask households and businesses to cut use by a target share",
            heuristic_id: H2,
            fields: vec![
                duration(30.0, 120.0, 60.0),
                range("reduction_pct", "Requested consumption cut", 5.0, 20.0, 10.0, "%"),
            ],
            impact: scaled(9.0, "reduction_pct", 10.0),
            profile: [0.55, 0.1, 0.8, 0.7],
        },
        ActionDef {
            code: "A04",
            title: "Network leak detection and repair",
            description: "Accelerated leak survey and repair of the distribution network",
            heuristic_id: H2,
            fields: vec![
                duration(30.0, 180.0, 90.0),
                range("coverage_pct", "Share of network surveyed", 10.0, 100.0, 40.0, "%"),
            ],
            impact: scaled(8.0, "coverage_pct", 40.0),
            profile: [0.7, 0.55, 0.7, 0.6],
        },
        ActionDef {
            code: "A05",
            title: "Industrial water-efficiency audits",
            description: "On-site audits of the largest industrial consumers",
            heuristic_id: H2,
            fields: vec![
                duration(30.0, 120.0, 60.0),
                integer("facilities", "Facilities audited", 5.0, 200.0, 40.0, "sites"),
            ],
            impact: scaled(6.0, "facilities", 40.0),
            profile: [0.6, 0.35, 0.75, 0.4],
        },
        ActionDef {
            code: "A06",
            title: "Groundwater reserve activation",
            description: "Draw on strategic aquifer reserves above the normal allocation",
            heuristic_id: H3,
            fields: vec![
                duration(30.0, 180.0, 60.0),
                range(
                    "extraction_rate_pct",
                    "Additional extraction relative to sustainable yield",
                    5.0,
                    30.0,
                    15.0,
                    "%",
                ),
            ],
            impact: scaled(22.0, "extraction_rate_pct", 15.0),
            profile: [0.65, 0.5, 0.7, 0.5],
        },
        ActionDef {
            code: "A07",
            title: "Inter-basin water transfer",
            description: "Temporary transfer from a neighbouring basin",
            heuristic_id: H3,
            fields: vec![
                duration(30.0, 120.0, 60.0),
                range("volume_hm3", "Transferred volume", 1.0, 50.0, 10.0, "hm3"),
            ],
            impact: scaled(25.0, "volume_hm3", 10.0),
            profile: [0.6, 0.85, 0.4, 0.55],
        },
        ActionDef {
            code: "A08",
            title: "Treated wastewater reuse",
            description: "Substitute potable irrigation with reclaimed water",
            heuristic_id: H3,
            fields: vec![
                duration(60.0, 180.0, 90.0),
                range("reuse_share_pct", "Share of irrigation demand served", 5.0, 40.0, 15.0, "%"),
            ],
            impact: scaled(14.0, "reuse_share_pct", 15.0),
            profile: [0.6, 0.6, 0.55, 0.5],
        },
        ActionDef {
            code: "A09",
            title: "Outdoor irrigation ban",
            description: "Prohibit garden and landscape irrigation with potable water",
            heuristic_id: H4,
            fields: vec![
                duration(14.0, 60.0, 30.0),
                choice("enforcement", "Enforcement regime", &["advisory", "fines"], "fines"),
            ],
            impact: fixed(19.0),
            profile: [0.7, 0.1, 0.85, 0.65],
        },
        ActionDef {
            code: "A10",
            title: "Non-essential commercial use restrictions",
            description: "Restrict car washes, ornamental fountains and pool filling",
            heuristic_id: H4,
            fields: vec![
                duration(14.0, 60.0, 30.0),
                choice(
                    "sectors",
                    "Scope of the restriction",
                    &["car_washes", "pools_and_fountains", "all_non_essential"],
                    "all_non_essential",
                ),
            ],
            impact: fixed(12.0),
            profile: [0.65, 0.25, 0.75, 0.6],
        },
        ActionDef {
            code: "A11",
            title: "Drought surcharge tariff",
            description: "Temporary surcharge on consumption above a basic allowance",
            heuristic_id: H4,
            fields: vec![
                duration(30.0, 90.0, 60.0),
                range("surcharge_pct", "Surcharge above the basic tariff", 10.0, 50.0, 25.0, "%"),
            ],
            impact: scaled(10.0, "surcharge_pct", 25.0),
            profile: [0.55, 0.05, 0.7, 0.3],
        },
        ActionDef {
            code: "A12",
            title: "Mandatory rationing schedule",
            description: "Rotating supply cuts across distribution sectors",
            heuristic_id: H5,
            fields: vec![
                duration(7.0, 45.0, 21.0),
                range("rationing_cut_pct", "Supply reduction", 10.0, 40.0, 20.0, "%"),
            ],
            impact: scaled(16.0, "rationing_cut_pct", 20.0),
            profile: [0.7, 0.3, 0.6, 0.35],
        },
        ActionDef {
            code: "A13",
            title: "Emergency water trucking",
            description: "Trucked supply to hospitals, care homes and other priority users",
            heuristic_id: H5,
            fields: vec![
                duration(7.0, 60.0, 21.0),
                range("daily_volume_m3", "Volume delivered per day", 50.0, 2000.0, 500.0, "m3"),
            ],
            impact: scaled(5.0, "daily_volume_m3", 500.0),
            profile: [0.5, 0.8, 0.65, 0.95],
        },
        ActionDef {
            code: "A14",
            title: "Crisis coordination cell",
            description: "Standing inter-agency cell for drought decisions",
            heuristic_id: H6,
            fields: vec![
                duration(14.0, 90.0, 30.0),
                choice(
                    "meeting_frequency",
                    "How often the cell convenes",
                    &["daily", "twice_weekly", "weekly"],
                    "daily",
                ),
            ],
            impact: fixed(3.0),
            profile: [0.5, 0.15, 0.9, 0.7],
        },
        ActionDef {
            code: "A15",
            title: "Temporary agricultural allocation cut",
            description: "Reduce irrigation allocations for the remainder of the season",
            heuristic_id: H6,
            fields: vec![
                duration(30.0, 120.0, 60.0),
                range("allocation_cut_pct", "Reduction of agricultural allocation", 10.0, 50.0, 25.0, "%"),
            ],
            impact: scaled(18.0, "allocation_cut_pct", 25.0),
            profile: [0.6, 0.7, 0.5, 0.35],
        },
    ];

    defs.into_iter()
        .map(|d| BaseAction {
            code: d.code.to_string(),
            title: d.title.to_string(),
            description: d.description.to_string(),
            heuristic_id: d.heuristic_id,
            schema: ParameterSchema { fields: d.fields },
            impact: d.impact,
            confidence: d.profile[0],
            cost: d.profile[1],
            feasibility: d.profile[2],
            equity: d.profile[3],
        })
        .collect()
}
