//! Error taxonomy for the decision core
//!
//! Data-availability errors are surfaced to the caller with enough context to
//! retry with different inputs. AI-layer errors never escape the orchestrator:
//! they select the fallback branch instead.

use thiserror::Error;

/// Errors produced by the decision core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Not enough precipitation history for a stable distribution fit
    #[error("insufficient data for zone {zone_id}: {reason} (have {available}, need {required})")]
    InsufficientData {
        zone_id: String,
        reason: String,
        available: usize,
        required: usize,
    },

    /// Precipitation series contains values the fit cannot use
    #[error("malformed precipitation series for zone {zone_id}: {reason}")]
    MalformedSeries { zone_id: String, reason: String },

    /// Zone is unknown to the data collaborator
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// Zone id is not a valid identifier
    #[error("invalid zone id: {0:?}")]
    InvalidZoneId(String),

    /// AI provider failed (recovered locally via fallback)
    #[error("AI provider error: {0}")]
    AiProvider(String),

    /// AI output outside the action's parameter schema
    #[error("invalid parameter {parameter} for action {action_code}: {reason}")]
    InvalidParameter {
        action_code: String,
        parameter: String,
        reason: String,
    },

    /// Projection horizon outside the supported bounds
    #[error("projection_days must be within {min}..={max} (got {requested})")]
    SimulationRange { requested: u32, min: u32, max: u32 },

    /// Simulation referenced an action instance that was never issued for the zone
    #[error("action instance {instance_id} not found for zone {zone_id}")]
    ActionNotFound { zone_id: String, instance_id: String },

    /// Catalog failed its load-time validation
    #[error("invalid catalog: {0}")]
    Catalog(String),

    /// Persistence collaborator failure
    #[error("store error: {0}")]
    Store(String),
}

impl CoreError {
    /// Whether the error was caused by the request (4xx-equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::ZoneNotFound(_)
                | CoreError::InvalidZoneId(_)
                | CoreError::SimulationRange { .. }
                | CoreError::ActionNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
