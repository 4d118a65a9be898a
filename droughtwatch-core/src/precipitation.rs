//! Precipitation series and the ingestion collaborator interface
//!
//! The core never fetches data itself: it receives a `PrecipitationSource`.
//! `JsonDirectorySource` is the file-backed adapter used by the CLI.

use crate::error::{CoreError, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Single precipitation observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrecipitationObservation {
    pub date: NaiveDate,
    pub amount_mm: f64,
}

/// Ordered precipitation history for a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrecipitationSeries {
    pub zone_id: String,
    pub observations: Vec<PrecipitationObservation>,
}

impl PrecipitationSeries {
    /// Build a series, sorting observations by date
    pub fn new(zone_id: impl Into<String>, mut observations: Vec<PrecipitationObservation>) -> Self {
        observations.sort_by(|a, b| a.date.cmp(&b.date));
        PrecipitationSeries {
            zone_id: zone_id.into(),
            observations,
        }
    }

    /// Build a series of month-start observations from monthly totals
    pub fn from_monthly_totals(zone_id: impl Into<String>, start: NaiveDate, totals: &[f64]) -> Self {
        let observations = totals
            .iter()
            .enumerate()
            .filter_map(|(i, &amount_mm)| {
                start
                    .checked_add_months(chrono::Months::new(i as u32))
                    .map(|date| PrecipitationObservation { date, amount_mm })
            })
            .collect();
        PrecipitationSeries::new(zone_id, observations)
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Date of the most recent observation
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.observations.last().map(|o| o.date)
    }
}

/// Time window requested from the ingestion collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// Months of history to cover, counting back from `end`
    pub months: u32,
    /// Inclusive end date (None = latest available)
    pub end: Option<NaiveDate>,
}

impl FetchWindow {
    pub fn trailing_months(months: u32) -> Self {
        FetchWindow { months, end: None }
    }
}

/// Ingestion collaborator
pub trait PrecipitationSource: Send + Sync {
    fn fetch_precipitation(&self, zone_id: &str, window: FetchWindow) -> Result<PrecipitationSeries>;
}

fn zone_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("zone id pattern is valid")
    })
}

/// Validate a zone identifier (also guards file-backed adapters against path traversal)
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    if zone_id_pattern().is_match(zone_id) {
        Ok(())
    } else {
        Err(CoreError::InvalidZoneId(zone_id.to_string()))
    }
}

/// Trim a series to the trailing window
pub fn apply_window(series: PrecipitationSeries, window: FetchWindow) -> PrecipitationSeries {
    let end = match window.end.or_else(|| series.last_date()) {
        Some(end) => end,
        None => return series,
    };
    let start = end
        .checked_sub_months(chrono::Months::new(window.months))
        .unwrap_or(NaiveDate::MIN);
    let observations = series
        .observations
        .into_iter()
        .filter(|o| o.date > start && o.date <= end)
        .collect();
    PrecipitationSeries {
        zone_id: series.zone_id,
        observations,
    }
}

/// Reads `<dir>/<zone_id>.json` files holding a serialized `PrecipitationSeries`
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    dir: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonDirectorySource { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn zone_path(&self, zone_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", zone_id))
    }

    /// List zone ids available in the directory, sorted
    pub fn list_zones(&self) -> anyhow::Result<Vec<String>> {
        use anyhow::Context;

        let mut zones = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read data directory: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_zone_id(stem).is_ok() {
                    zones.push(stem.to_string());
                }
            }
        }
        zones.sort();
        Ok(zones)
    }
}

impl PrecipitationSource for JsonDirectorySource {
    fn fetch_precipitation(&self, zone_id: &str, window: FetchWindow) -> Result<PrecipitationSeries> {
        validate_zone_id(zone_id)?;
        let path = self.zone_path(zone_id);
        if !path.is_file() {
            return Err(CoreError::ZoneNotFound(zone_id.to_string()));
        }
        let json = std::fs::read_to_string(&path).map_err(|e| CoreError::MalformedSeries {
            zone_id: zone_id.to_string(),
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        let series: PrecipitationSeries =
            serde_json::from_str(&json).map_err(|e| CoreError::MalformedSeries {
                zone_id: zone_id.to_string(),
                reason: format!("failed to parse {}: {}", path.display(), e),
            })?;
        let series = PrecipitationSeries::new(zone_id, series.observations);
        Ok(apply_window(series, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_zone_id_validation() {
        assert!(validate_zone_id("north-basin_2").is_ok());
        assert!(validate_zone_id("").is_err());
        assert!(validate_zone_id("../etc/passwd").is_err());
        assert!(validate_zone_id("-leading-dash").is_err());
    }

    #[test]
    fn test_new_sorts_observations() {
        let series = PrecipitationSeries::new(
            "z",
            vec![
                PrecipitationObservation { date: date(2024, 3, 1), amount_mm: 1.0 },
                PrecipitationObservation { date: date(2024, 1, 1), amount_mm: 2.0 },
            ],
        );
        assert_eq!(series.observations[0].date, date(2024, 1, 1));
        assert_eq!(series.last_date(), Some(date(2024, 3, 1)));
    }

    #[test]
    fn test_apply_window_keeps_trailing_months() {
        let series = PrecipitationSeries::from_monthly_totals("z", date(2020, 1, 1), &[10.0; 48]);
        let trimmed = apply_window(series, FetchWindow::trailing_months(12));
        assert_eq!(trimmed.observations.len(), 12);
        assert_eq!(trimmed.last_date(), Some(date(2023, 12, 1)));
    }

    #[test]
    fn test_json_directory_source() {
        let dir = TempDir::new().expect("failed to create temp directory");
        let series = PrecipitationSeries::from_monthly_totals("alpha", date(2021, 1, 1), &[5.0; 6]);
        std::fs::write(
            dir.path().join("alpha.json"),
            serde_json::to_string(&series).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = JsonDirectorySource::new(dir.path());
        assert_eq!(source.list_zones().unwrap(), vec!["alpha".to_string()]);

        let fetched = source
            .fetch_precipitation("alpha", FetchWindow::trailing_months(120))
            .unwrap();
        assert_eq!(fetched.observations.len(), 6);

        let missing = source.fetch_precipitation("beta", FetchWindow::trailing_months(12));
        assert!(matches!(missing, Err(CoreError::ZoneNotFound(_))));
    }
}
