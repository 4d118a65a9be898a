//! Request-scoped pipeline over the collaborators
//!
//! precipitation -> SPI -> trend/level -> days-to-critical -> heuristics ->
//! ranking/parameterization -> simulation. Every stage is stateless; the only
//! state lives in the store.

use crate::ai::{provider_from_settings, AiProvider};
use crate::assessment::RiskAssessment;
use crate::catalog::Catalog;
use crate::config::ResolvedConfig;
use crate::error::{CoreError, Result};
use crate::heuristics::{evaluate, ActivatedHeuristic, RAPID_DETERIORATION_LOOKBACK_DAYS};
use crate::orchestrator::{ActionInstance, Orchestrator};
use crate::precipitation::{validate_zone_id, FetchWindow, JsonDirectorySource, PrecipitationSource};
use crate::ranking::{rank_candidates, Profile, ProfileWeights};
use crate::simulation::{simulate_scenarios, SimulationResult, MAX_PROJECTION_DAYS, MIN_PROJECTION_DAYS};
use crate::spi::{calculate_spi, spi_history};
use crate::store::{AssessmentStore, MemoryStore, SqliteStore};
use crate::trend::{analyze_trend, LONG_TERM_POINTS};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Months of precipitation requested for the distribution fit (30 years)
pub const CALIBRATION_MONTHS: u32 = 360;

/// Output of a recommendation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecommendationSet {
    pub context: RiskAssessment,
    pub profile: Profile,
    pub activated_heuristics: Vec<ActivatedHeuristic>,
    pub actions: Vec<ActionInstance>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Decision core wired to its collaborators
#[derive(Clone)]
pub struct Engine {
    catalog: Arc<Catalog>,
    source: Arc<dyn PrecipitationSource>,
    store: Arc<dyn AssessmentStore>,
    orchestrator: Orchestrator,
    government_weights: ProfileWeights,
    industry_weights: ProfileWeights,
    clock: Clock,
}

impl Engine {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn PrecipitationSource>,
        store: Arc<dyn AssessmentStore>,
        provider: Arc<dyn AiProvider>,
    ) -> Self {
        Engine {
            catalog,
            source,
            store,
            orchestrator: Orchestrator::new(provider),
            government_weights: ProfileWeights::for_profile(Profile::Government),
            industry_weights: ProfileWeights::for_profile(Profile::Industry),
            clock: Arc::new(Utc::now),
        }
    }

    /// Wire an engine from resolved configuration
    pub fn from_config(config: &ResolvedConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let catalog = Arc::new(Catalog::load().context("failed to load catalog")?);
        let source = Arc::new(JsonDirectorySource::new(&config.data_dir));
        let store: Arc<dyn AssessmentStore> = match &config.store_path {
            Some(path) => Arc::new(
                SqliteStore::open(path)
                    .with_context(|| format!("failed to open store: {}", path.display()))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };
        let provider = provider_from_settings(&config.ai);

        Ok(Engine::new(catalog, source, store, provider)
            .with_weights(Profile::Government, config.weights(Profile::Government))
            .with_weights(Profile::Industry, config.weights(Profile::Industry)))
    }

    pub fn with_weights(mut self, profile: Profile, weights: ProfileWeights) -> Self {
        match profile {
            Profile::Government => self.government_weights = weights,
            Profile::Industry => self.industry_weights = weights,
        }
        self
    }

    /// Replace the wall clock (fixed clocks make runs reproducible)
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn weights(&self, profile: Profile) -> &ProfileWeights {
        match profile {
            Profile::Government => &self.government_weights,
            Profile::Industry => &self.industry_weights,
        }
    }

    /// Compute the current assessment for a zone and append it to history
    pub fn get_current_risk(&self, zone_id: &str) -> Result<RiskAssessment> {
        validate_zone_id(zone_id)?;
        let now = (self.clock)();

        let series = self
            .source
            .fetch_precipitation(zone_id, FetchWindow::trailing_months(CALIBRATION_MONTHS))?;
        let spi = calculate_spi(&series)?;
        let history = spi_history(&series, LONG_TERM_POINTS)?;
        let analysis = analyze_trend(zone_id, &history)?;

        let lookback_start = now - Duration::days(RAPID_DETERIORATION_LOOKBACK_DAYS);
        let previous = self.store.assessments_since(zone_id, lookback_start)?;
        let assessment = RiskAssessment::assess(zone_id, spi.spi, &analysis, &previous, now);
        self.store.append_assessment(&assessment)?;

        tracing::info!(
            zone = zone_id,
            spi = assessment.spi,
            level = %assessment.risk_level,
            trend = %assessment.trend,
            days = ?assessment.days(),
            "assessed zone"
        );
        Ok(assessment)
    }

    /// Stored assessments of the last `days` days, oldest first
    pub fn get_risk_history(&self, zone_id: &str, days: u32) -> Result<Vec<RiskAssessment>> {
        validate_zone_id(zone_id)?;
        let since = (self.clock)() - Duration::days(i64::from(days));
        self.store.assessments_since(zone_id, since)
    }

    /// Assess the zone, evaluate heuristics and parameterize ranked actions
    ///
    /// Issued instances are recorded so they can be simulated later.
    pub fn get_recommended_actions(&self, zone_id: &str, profile: Profile) -> Result<RecommendationSet> {
        let context = self.get_current_risk(zone_id)?;
        let activated = evaluate(self.catalog.heuristics(), &context);
        let ranked = rank_candidates(&self.catalog, &activated, self.weights(profile));
        let actions = self
            .orchestrator
            .parameterize_all(&self.catalog, &ranked, &context)?;
        self.store
            .record_actions(zone_id, &actions, context.computed_at)?;

        tracing::info!(
            zone = zone_id,
            %profile,
            heuristics = activated.len(),
            actions = actions.len(),
            fallbacks = actions.iter().filter(|a| a.fallback_reason.is_some()).count(),
            "issued recommendations"
        );
        Ok(RecommendationSet {
            context,
            profile,
            activated_heuristics: activated,
            actions,
        })
    }

    /// Simulate previously issued actions against the zone's latest assessment
    pub fn simulate(
        &self,
        zone_id: &str,
        action_instance_ids: &[Uuid],
        projection_days: u32,
    ) -> Result<SimulationResult> {
        validate_zone_id(zone_id)?;
        if !(MIN_PROJECTION_DAYS..=MAX_PROJECTION_DAYS).contains(&projection_days) {
            return Err(CoreError::SimulationRange {
                requested: projection_days,
                min: MIN_PROJECTION_DAYS,
                max: MAX_PROJECTION_DAYS,
            });
        }

        let mut ids: Vec<Uuid> = Vec::with_capacity(action_instance_ids.len());
        for id in action_instance_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        let actions = ids
            .iter()
            .map(|id| {
                self.store
                    .find_action(zone_id, *id)?
                    .ok_or_else(|| CoreError::ActionNotFound {
                        zone_id: zone_id.to_string(),
                        instance_id: id.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let context = match self.store.latest_assessment(zone_id)? {
            Some(assessment) => assessment,
            None => self.get_current_risk(zone_id)?,
        };
        simulate_scenarios(&context, &actions, projection_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::DisabledProvider;
    use crate::precipitation::PrecipitationSeries;
    use chrono::{NaiveDate, TimeZone};

    struct Fixed(PrecipitationSeries);

    impl PrecipitationSource for Fixed {
        fn fetch_precipitation(&self, zone_id: &str, _window: FetchWindow) -> Result<PrecipitationSeries> {
            if zone_id == self.0.zone_id {
                Ok(self.0.clone())
            } else {
                Err(CoreError::ZoneNotFound(zone_id.to_string()))
            }
        }
    }

    fn engine() -> Engine {
        // wet history followed by a steady decline
        let mut totals: Vec<f64> = (0..48).map(|i| 60.0 + (i % 7) as f64 * 8.0).collect();
        totals.extend([40.0, 30.0, 20.0, 12.0, 8.0, 4.0, 2.0, 1.0]);
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let series = PrecipitationSeries::from_monthly_totals("north", start, &totals);
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        Engine::new(
            Arc::new(Catalog::load().unwrap()),
            Arc::new(Fixed(series)),
            Arc::new(MemoryStore::new()),
            Arc::new(DisabledProvider),
        )
        .with_clock(move || now)
    }

    #[test]
    fn test_current_risk_is_appended() {
        let engine = engine();
        let assessment = engine.get_current_risk("north").unwrap();
        assert!(assessment.spi.is_finite());
        assert_eq!(engine.get_risk_history("north", 1).unwrap(), vec![assessment]);
    }

    #[test]
    fn test_unknown_and_invalid_zones() {
        let engine = engine();
        assert!(matches!(engine.get_current_risk("south"), Err(CoreError::ZoneNotFound(_))));
        assert!(matches!(engine.get_current_risk("../x"), Err(CoreError::InvalidZoneId(_))));
    }

    #[test]
    fn test_simulate_rejects_unknown_instance() {
        let engine = engine();
        let result = engine.simulate("north", &[Uuid::new_v4()], 90);
        assert!(matches!(result, Err(CoreError::ActionNotFound { .. })));
        assert!(matches!(
            engine.simulate("north", &[], 0),
            Err(CoreError::SimulationRange { .. })
        ));
    }
}
