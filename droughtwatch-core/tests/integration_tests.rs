//! Integration tests for the droughtwatch pipeline
//!
//! Drive the engine end to end over a JSON data directory and a SQLite store,
//! plus the reference scenario worked by hand.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use droughtwatch_core::ai::{DemoProvider, DisabledProvider, Method};
use droughtwatch_core::catalog::Catalog;
use droughtwatch_core::heuristics::{evaluate, HeuristicId};
use droughtwatch_core::orchestrator::Orchestrator;
use droughtwatch_core::precipitation::{JsonDirectorySource, PrecipitationSeries};
use droughtwatch_core::ranking::{rank_candidates, Profile, ProfileWeights};
use droughtwatch_core::simulation::simulate_scenarios;
use droughtwatch_core::store::{AssessmentStore, SqliteStore};
use droughtwatch_core::{CoreError, Engine, RiskAssessment, RiskLevel, Trend};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap()
}

/// -1.72 SPI, worsening, 24 days from the critical threshold
fn reference_assessment() -> RiskAssessment {
    RiskAssessment::new("valley", -1.72, Trend::Worsening, -0.28 / 24.0, now())
}

/// Five years of variable rainfall ending in an eight-month dry spell
fn write_zone(dir: &Path, zone_id: &str) {
    let mut totals: Vec<f64> = (0..60)
        .map(|i| {
            let t = i as f64;
            (85.0 + 45.0 * (t * 0.37).sin() + 25.0 * (t * 0.11).cos()).max(5.0)
        })
        .collect();
    totals.extend([55.0, 45.0, 38.0, 30.0, 22.0, 16.0, 11.0, 7.0]);
    let start = NaiveDate::from_ymd_opt(2019, 5, 1).unwrap();
    let series = PrecipitationSeries::from_monthly_totals(zone_id, start, &totals);
    std::fs::write(
        dir.join(format!("{}.json", zone_id)),
        serde_json::to_string_pretty(&series).unwrap(),
    )
    .unwrap();
}

fn engine(data: &Path, store: Arc<dyn AssessmentStore>) -> Engine {
    Engine::new(
        Arc::new(Catalog::load().unwrap()),
        Arc::new(JsonDirectorySource::new(data)),
        store,
        Arc::new(DemoProvider::new()),
    )
    .with_clock(now)
}

#[test]
fn test_reference_case_activates_only_h4() {
    let catalog = Catalog::load().unwrap();
    let context = reference_assessment();
    assert_eq!(context.risk_level, RiskLevel::Critical);
    assert!((context.days().unwrap() - 24.0).abs() < 1e-9);

    let activated = evaluate(catalog.heuristics(), &context);
    assert_eq!(activated.len(), 1);
    assert_eq!(activated[0].heuristic_id, HeuristicId::H4);
    assert_eq!(activated[0].candidate_actions, vec!["A09", "A10", "A11"]);
}

#[test]
fn test_irrigation_ban_gains_nineteen_days() {
    let catalog = Catalog::load().unwrap();
    let context = reference_assessment();
    let ranked = rank_candidates(
        &catalog,
        &evaluate(catalog.heuristics(), &context),
        &ProfileWeights::for_profile(Profile::Government),
    );
    let ban = ranked.iter().find(|c| c.action_code == "A09").unwrap();
    let instance = Orchestrator::new(Arc::new(DisabledProvider))
        .parameterize(&catalog, ban, &context)
        .unwrap();
    assert_eq!(instance.method, Method::Fallback);
    assert_eq!(instance.expected_effect.formula, "+19 days");
    assert_eq!(instance.duration_days, 30.0);

    let result = simulate_scenarios(&context, &[instance], 90).unwrap();
    let without = result.no_action.days_to_critical.unwrap();
    let with = result.with_action.days_to_critical.unwrap();
    assert!((without - 24.0).abs() < 1e-9);
    assert!((with - 43.0).abs() < 1e-9);
    assert!((result.comparison.days_gained - 19.0).abs() < 1e-9);
    assert!(!result.comparison.h6_penalty_applied);
}

#[test]
fn test_rapid_deterioration_penalizes_other_actions() {
    let catalog = Catalog::load().unwrap();
    let context = reference_assessment().with_deterioration(Some(0.35));

    let activated = evaluate(catalog.heuristics(), &context);
    let ids: Vec<HeuristicId> = activated.iter().map(|a| a.heuristic_id).collect();
    assert_eq!(ids, vec![HeuristicId::H4, HeuristicId::H6]);

    let ranked = rank_candidates(&catalog, &activated, &ProfileWeights::for_profile(Profile::Government));
    let ban = ranked.iter().find(|c| c.action_code == "A09").unwrap();
    let instance = Orchestrator::new(Arc::new(DisabledProvider))
        .parameterize(&catalog, ban, &context)
        .unwrap();

    let result = simulate_scenarios(&context, &[instance], 90).unwrap();
    assert!(result.comparison.h6_penalty_applied);
    assert!(result.actions_applied[0].penalized);
    assert!((result.comparison.days_gained - 19.0 * 0.8).abs() < 1e-9);
}

#[test]
fn test_recommend_then_simulate_across_store_reopen() {
    let data = TempDir::new().unwrap();
    write_zone(data.path(), "valley");
    let db = data.path().join("history.db");

    let set = {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        engine(data.path(), store)
            .get_recommended_actions("valley", Profile::Industry)
            .unwrap()
    };

    assert_eq!(set.profile, Profile::Industry);
    assert!(set.context.spi.is_finite());
    assert_eq!(set.activated_heuristics.is_empty(), set.actions.is_empty());
    assert!(set.actions.len() <= 15);
    for pair in set.actions.windows(2) {
        assert!(pair[0].priority_score >= pair[1].priority_score);
    }

    let catalog = Catalog::load().unwrap();
    for action in &set.actions {
        assert_eq!(action.method, Method::Demo);
        assert!(action.fallback_reason.is_none());
        assert!(set
            .activated_heuristics
            .iter()
            .any(|h| h.heuristic_id == action.heuristic_id));
        let base = catalog.action(&action.action_code).unwrap();
        assert!(base.schema.contains(&action.parameters));
    }

    // a new process sees the same history and issued actions
    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let engine = engine(data.path(), store.clone());
    assert_eq!(
        store.latest_assessment("valley").unwrap().as_ref(),
        Some(&set.context)
    );

    // issued actions carry the engine clock, not the wall clock
    assert_eq!(store.actions_issued_since("valley", now()).unwrap(), set.actions);
    assert!(store
        .actions_issued_since("valley", now() + Duration::seconds(1))
        .unwrap()
        .is_empty());

    let ids: Vec<_> = set.actions.iter().map(|a| a.instance_id).collect();
    let first = engine.simulate("valley", &ids, 120).unwrap();
    let second = engine.simulate("valley", &ids, 120).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.comparison.actions_count, ids.len());
    assert_eq!(first.no_action.trajectory.len(), 121);
    assert!(first.comparison.days_gained >= 0.0);
    if ids.is_empty() {
        assert_eq!(first.no_action, first.with_action);
    }
}

#[test]
fn test_simulate_rejects_actions_from_another_zone() {
    let data = TempDir::new().unwrap();
    write_zone(data.path(), "valley");
    write_zone(data.path(), "ridge");
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = engine(data.path(), store);

    let catalog = Catalog::load().unwrap();
    let context = reference_assessment();
    let ranked = rank_candidates(
        &catalog,
        &evaluate(catalog.heuristics(), &context),
        &ProfileWeights::for_profile(Profile::Government),
    );
    let issued = Orchestrator::new(Arc::new(DemoProvider::new()))
        .parameterize_all(&catalog, &ranked, &context)
        .unwrap();

    let ids: Vec<_> = issued.iter().map(|a| a.instance_id).collect();
    assert!(matches!(
        engine.simulate("ridge", &ids, 90),
        Err(CoreError::ActionNotFound { .. })
    ));
    assert!(matches!(
        engine.simulate("ridge", &[], 366),
        Err(CoreError::SimulationRange { .. })
    ));
}

#[test]
fn test_history_and_missing_zone() {
    let data = TempDir::new().unwrap();
    write_zone(data.path(), "valley");
    let engine = engine(data.path(), Arc::new(SqliteStore::in_memory().unwrap()));

    let first = engine.get_current_risk("valley").unwrap();
    let second = engine.get_current_risk("valley").unwrap();
    assert_eq!(first.spi, second.spi);
    assert_eq!(engine.get_risk_history("valley", 30).unwrap().len(), 2);
    assert!(engine.get_risk_history("ridge", 30).unwrap().is_empty());

    assert!(matches!(
        engine.get_current_risk("ridge"),
        Err(CoreError::ZoneNotFound(_))
    ));
    assert!(matches!(
        engine.get_current_risk("../valley"),
        Err(CoreError::InvalidZoneId(_))
    ));
}

#[test]
fn test_source_lists_zones() {
    let data = TempDir::new().unwrap();
    write_zone(data.path(), "valley");
    write_zone(data.path(), "ridge");
    std::fs::write(data.path().join("notes.txt"), "not a zone").unwrap();

    let source = JsonDirectorySource::new(data.path());
    assert_eq!(source.list_zones().unwrap(), vec!["ridge", "valley"]);
}
