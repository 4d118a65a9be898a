//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Identical results render to identical text

use crate::assessment::RiskAssessment;
use crate::engine::RecommendationSet;
use crate::simulation::SimulationResult;
use serde::Serialize;

/// Render any result as pretty JSON
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    use anyhow::Context;
    serde_json::to_string_pretty(value).context("failed to render JSON")
}

fn days_text(days: Option<f64>) -> String {
    match days {
        Some(d) => format!("{:.1}", d),
        None => "-".to_string(),
    }
}

/// Sort assessments for multi-zone output: most severe first, then zone id
pub fn sort_assessments(mut assessments: Vec<RiskAssessment>) -> Vec<RiskAssessment> {
    assessments.sort_by(|a, b| {
        b.risk_level
            .cmp(&a.risk_level)
            .then_with(|| a.spi.total_cmp(&b.spi))
            .then_with(|| a.zone_id.cmp(&b.zone_id))
    });
    assessments
}

/// Render assessments as a table
pub fn render_assessments_text(assessments: &[RiskAssessment]) -> String {
    let mut output = format!(
        "{:<20} {:>7} {:<9} {:<10} {:>12} {:>10}\n",
        "ZONE", "SPI", "LEVEL", "TREND", "SPI/DAY", "DAYS"
    );
    for a in assessments {
        output.push_str(&format!(
            "{:<20} {:>7.2} {:<9} {:<10} {:>12.4} {:>10}\n",
            truncate_or_pad(&a.zone_id, 20),
            a.spi,
            a.risk_level,
            a.trend,
            a.velocity,
            days_text(a.days()),
        ));
    }
    output
}

/// Render a zone's stored assessments, oldest first
pub fn render_history_text(zone_id: &str, history: &[RiskAssessment]) -> String {
    if history.is_empty() {
        return format!("No stored assessments for zone {}\n", zone_id);
    }
    let mut output = format!(
        "{:<20} {:>7} {:<9} {:<10} {:>10}\n",
        "COMPUTED", "SPI", "LEVEL", "TREND", "DAYS"
    );
    for a in history {
        output.push_str(&format!(
            "{:<20} {:>7.2} {:<9} {:<10} {:>10}\n",
            a.computed_at.format("%Y-%m-%d %H:%M").to_string(),
            a.spi,
            a.risk_level,
            a.trend,
            days_text(a.days()),
        ));
    }
    output
}

/// Render a single assessment
pub fn render_assessment_text(a: &RiskAssessment) -> String {
    let mut output = format!(
        "Zone {}\n  SPI:        {:.2} ({})\n  Trend:      {} ({:+.4} SPI/day)\n",
        a.zone_id, a.spi, a.risk_level, a.trend, a.velocity
    );
    match a.days_to_critical {
        Some(d) => output.push_str(&format!(
            "  Critical:   ~{:.1} days to SPI {:.1} (estimate)\n",
            d.estimated_days, d.threshold_spi
        )),
        None => output.push_str("  Critical:   no estimate (not worsening)\n"),
    }
    if let Some(drop) = a.deterioration {
        output.push_str(&format!(
            "  Outlook:    {:.0}% fewer days than two weeks ago\n",
            drop * 100.0
        ));
    }
    output.push_str(&format!("  Computed:   {}\n", a.computed_at.to_rfc3339()));
    output
}

/// Render recommendations with their provenance
pub fn render_recommendations_text(set: &RecommendationSet) -> String {
    let mut output = render_assessment_text(&set.context);
    output.push('\n');

    if set.activated_heuristics.is_empty() {
        output.push_str("No heuristics activated; no actions recommended.\n");
        return output;
    }

    let activated = set
        .activated_heuristics
        .iter()
        .map(|h| format!("{} {} (priority {})", h.heuristic_id, h.name, h.priority))
        .collect::<Vec<_>>()
        .join("; ");
    output.push_str(&format!("Activated: {}\n\n", activated));

    output.push_str(&format!(
        "{:<5} {:<40} {:>6} {:>10} {:<9} {}\n",
        "CODE", "ACTION", "SCORE", "EFFECT", "METHOD", "INSTANCE"
    ));
    for action in &set.actions {
        output.push_str(&format!(
            "{:<5} {:<40} {:>6.3} {:>10} {:<9} {}\n",
            action.action_code,
            truncate_or_pad(&action.title, 40),
            action.priority_score,
            format!("+{:.1}d", action.expected_effect.days_gained),
            action.method,
            action.instance_id,
        ));
        let params = action
            .parameters
            .iter()
            .map(|(k, v)| match v.as_number() {
                Some(n) => format!("{}={}", k, n),
                None => format!("{}={}", k, serde_json::to_string(v).unwrap_or_default()),
            })
            .collect::<Vec<_>>()
            .join(", ");
        output.push_str(&format!("      {}\n      {}\n", params, action.justification));
    }
    output
}

/// Render a simulation comparison
pub fn render_simulation_text(result: &SimulationResult) -> String {
    let c = &result.comparison;
    let mut output = format!(
        "Zone {} - {} day projection, {} action(s)\n\n",
        result.zone_id, result.projection_days, c.actions_count
    );
    output.push_str(&format!("{:<14} {:>10} {:<9} {:>10}\n", "SCENARIO", "END SPI", "LEVEL", "CRITICAL"));
    for (name, scenario) in [("no action", &result.no_action), ("with action", &result.with_action)] {
        output.push_str(&format!(
            "{:<14} {:>10.2} {:<9} {:>10}\n",
            name,
            scenario.ending_spi,
            scenario.ending_risk_level,
            days_text(scenario.days_to_critical),
        ));
    }
    output.push_str(&format!(
        "\nDays gained:     {:+.1}\nSPI improvement: {:+.3}\nRisk level:      {}\n",
        c.days_gained, c.spi_improvement, c.risk_level_change
    ));
    if c.h6_penalty_applied {
        output.push_str("Rapid deterioration: effects of non-H6 actions reduced by 20%\n");
    }
    output
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        format!("{:<width$}", s, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::simulate_scenarios;
    use crate::trend::Trend;
    use chrono::{TimeZone, Utc};

    fn assessment(zone: &str, spi: f64, velocity: f64) -> RiskAssessment {
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        RiskAssessment::new(zone, spi, Trend::from_velocity(velocity), velocity, at)
    }

    #[test]
    fn test_sort_assessments_most_severe_first() {
        let sorted = sort_assessments(vec![
            assessment("b", -0.2, 0.0),
            assessment("c", -1.8, -0.01),
            assessment("a", -1.6, -0.01),
        ]);
        let zones: Vec<_> = sorted.iter().map(|a| a.zone_id.as_str()).collect();
        assert_eq!(zones, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_render_assessment_table() {
        let text = render_assessments_text(&[assessment("north", -1.72, -0.28 / 24.0)]);
        assert!(text.starts_with("ZONE"));
        assert!(text.contains("north"));
        assert!(text.contains("-1.72"));
        assert!(text.contains("CRITICAL"));
        assert!(text.contains("24.0"));
    }

    #[test]
    fn test_render_history() {
        assert!(render_history_text("east", &[]).contains("No stored assessments"));
        let text = render_history_text("north", &[assessment("north", -1.2, -0.01)]);
        assert!(text.contains("2025-07-01 00:00"));
        assert!(text.contains("HIGH"));
        assert!(text.contains("80.0"));
    }

    #[test]
    fn test_render_single_without_estimate() {
        let text = render_assessment_text(&assessment("south", -0.7, 0.0));
        assert!(text.contains("MEDIUM"));
        assert!(text.contains("no estimate"));
    }

    #[test]
    fn test_render_simulation() {
        let result = simulate_scenarios(&assessment("north", -1.72, -0.28 / 24.0), &[], 90).unwrap();
        let text = render_simulation_text(&result);
        assert!(text.contains("90 day projection"));
        assert!(text.contains("unchanged (CRITICAL)"));
        assert!(!text.contains("Rapid deterioration"));
        assert!(render_json(&result).unwrap().contains("\"days_gained\": 0.0"));
    }

    #[test]
    fn test_truncate_or_pad() {
        assert_eq!(truncate_or_pad("abc", 5), "abc  ");
        assert_eq!(truncate_or_pad("abcdefgh", 6), "abc...");
    }
}
