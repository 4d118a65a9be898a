//! droughtwatch core library - drought risk scoring, mitigation heuristics and
//! action-versus-no-action simulation

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Data flows one way: precipitation -> SPI -> trend/level -> days-to-critical
//   -> heuristics -> ranking/parameterization -> simulation
// - Catalogs are loaded once and never mutated
// - Assessments and issued actions are append-only
// - Chosen parameters always lie within the action's declared schema
// - Every action instance records how its parameters were chosen (ai, fallback, demo)
// - Simulation is a pure function of (assessment, actions, projection_days)

pub mod ai;
pub mod assessment;
pub mod catalog;
pub mod config;
pub mod critical;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod orchestrator;
pub mod precipitation;
pub mod ranking;
pub mod report;
pub mod risk;
pub mod simulation;
pub mod spi;
pub mod store;
pub mod trend;

pub use assessment::RiskAssessment;
pub use catalog::Catalog;
pub use config::ResolvedConfig;
pub use engine::{Engine, RecommendationSet};
pub use error::{CoreError, Result};
pub use orchestrator::ActionInstance;
pub use ranking::Profile;
pub use risk::RiskLevel;
pub use simulation::SimulationResult;
pub use trend::Trend;
