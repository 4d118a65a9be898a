//! Configuration file support for droughtwatch
//!
//! Loads deployment configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.droughtwatchrc.json` in project root
//! 3. `droughtwatch.config.json` in project root
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::ai::{
    AiMode, AiSettings, DEFAULT_AI_TIMEOUT_MS, DEFAULT_API_KEY_ENV, DEFAULT_ENDPOINT,
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};
use crate::ranking::{Profile, ProfileWeights};
use crate::simulation::{DEFAULT_PROJECTION_DAYS, MAX_PROJECTION_DAYS, MIN_PROJECTION_DAYS};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default window for `history` queries
pub const DEFAULT_HISTORY_DAYS: u32 = 90;

/// Upper bound for `history_days`
const MAX_HISTORY_DAYS: u32 = 3650;

/// Default directory holding `<zone_id>.json` precipitation files
pub const DEFAULT_DATA_DIR: &str = "data";

/// Upper bound for the provider timeout
const MAX_AI_TIMEOUT_MS: u64 = 60_000;

/// droughtwatch configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DroughtwatchConfig {
    /// Parameterization provider settings
    #[serde(default)]
    pub ai: Option<AiConfig>,

    /// Ranking weights per profile
    #[serde(default)]
    pub weights: Option<ProfileWeightsConfig>,

    /// Default simulation horizon in days (default: 90)
    #[serde(default)]
    pub projection_days: Option<u32>,

    /// Default history window in days (default: 90)
    #[serde(default)]
    pub history_days: Option<u32>,

    /// Directory with precipitation files (default: ./data)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// SQLite history database (default: in-memory)
    #[serde(default)]
    pub store: Option<PathBuf>,

    /// Zone filters for multi-zone runs
    #[serde(default)]
    pub zones: Option<ZonesConfig>,
}

/// Provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiConfig {
    /// live | demo | disabled (default: disabled)
    pub mode: Option<AiMode>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key (default: ANTHROPIC_API_KEY)
    pub api_key_env: Option<String>,
    /// Bound on a single call (default: 8000)
    pub timeout_ms: Option<u64>,
    pub max_tokens: Option<u32>,
}

/// Weight overrides per profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileWeightsConfig {
    pub government: Option<WeightConfig>,
    pub industry: Option<WeightConfig>,
}

/// Weight overrides for one profile; unset fields keep the built-in value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightConfig {
    pub urgency: Option<f64>,
    pub impact: Option<f64>,
    pub cost: Option<f64>,
    pub feasibility: Option<f64>,
    pub equity: Option<f64>,
}

impl WeightConfig {
    fn apply(&self, base: ProfileWeights) -> ProfileWeights {
        ProfileWeights {
            urgency: self.urgency.unwrap_or(base.urgency),
            impact: self.impact.unwrap_or(base.impact),
            cost: self.cost.unwrap_or(base.cost),
            feasibility: self.feasibility.unwrap_or(base.feasibility),
            equity: self.equity.unwrap_or(base.equity),
        }
    }
}

/// Zone include/exclude globs matched against zone ids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZonesConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Resolved configuration with compiled glob patterns
#[derive(Debug)]
pub struct ResolvedConfig {
    pub ai: AiSettings,
    pub government_weights: ProfileWeights,
    pub industry_weights: ProfileWeights,
    pub projection_days: u32,
    pub history_days: u32,
    pub data_dir: PathBuf,
    pub store_path: Option<PathBuf>,
    /// Compiled include patterns (None means include all)
    pub include: Option<GlobSet>,
    /// Compiled exclude patterns
    pub exclude: GlobSet,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl DroughtwatchConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref ai) = self.ai {
            if let Some(endpoint) = &ai.endpoint {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    anyhow::bail!("ai.endpoint must be an http(s) URL (got {})", endpoint);
                }
            }
            if let Some(timeout) = ai.timeout_ms {
                if timeout == 0 || timeout > MAX_AI_TIMEOUT_MS {
                    anyhow::bail!(
                        "ai.timeout_ms must be between 1 and {} (got {})",
                        MAX_AI_TIMEOUT_MS,
                        timeout
                    );
                }
            }
            if ai.max_tokens == Some(0) {
                anyhow::bail!("ai.max_tokens must be positive");
            }
            for (name, value) in [("model", &ai.model), ("api_key_env", &ai.api_key_env)] {
                if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                    anyhow::bail!("ai.{} must not be empty", name);
                }
            }
        }

        if let Some(ref weights) = self.weights {
            for (profile, config) in [
                (Profile::Government, &weights.government),
                (Profile::Industry, &weights.industry),
            ] {
                let Some(config) = config else { continue };
                let resolved = config.apply(ProfileWeights::for_profile(profile));
                for (name, value) in resolved.values() {
                    if !value.is_finite() || value < 0.0 {
                        anyhow::bail!(
                            "weights.{}.{} must be non-negative (got {})",
                            profile,
                            name,
                            value
                        );
                    }
                    if value > 10.0 {
                        anyhow::bail!(
                            "weights.{}.{} must be at most 10.0 (got {})",
                            profile,
                            name,
                            value
                        );
                    }
                }
                if resolved.values().iter().all(|(_, v)| *v == 0.0) {
                    anyhow::bail!("weights.{} must not all be zero", profile);
                }
            }
        }

        if let Some(days) = self.projection_days {
            if !(MIN_PROJECTION_DAYS..=MAX_PROJECTION_DAYS).contains(&days) {
                anyhow::bail!(
                    "projection_days must be between {} and {} (got {})",
                    MIN_PROJECTION_DAYS,
                    MAX_PROJECTION_DAYS,
                    days
                );
            }
        }

        if let Some(days) = self.history_days {
            if days == 0 || days > MAX_HISTORY_DAYS {
                anyhow::bail!(
                    "history_days must be between 1 and {} (got {})",
                    MAX_HISTORY_DAYS,
                    days
                );
            }
        }

        if let Some(ref zones) = self.zones {
            for pattern in &zones.include {
                Glob::new(pattern)
                    .with_context(|| format!("invalid zones.include pattern: {}", pattern))?;
            }
            for pattern in &zones.exclude {
                Glob::new(pattern)
                    .with_context(|| format!("invalid zones.exclude pattern: {}", pattern))?;
            }
        }

        Ok(())
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let zones = self.zones.clone().unwrap_or_default();
        let include = if zones.include.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &zones.include {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };
        let exclude = {
            let mut builder = GlobSetBuilder::new();
            for pattern in &zones.exclude {
                builder.add(Glob::new(pattern)?);
            }
            builder.build()?
        };

        let ai = match &self.ai {
            Some(a) => AiSettings {
                mode: a.mode.unwrap_or(AiMode::Disabled),
                endpoint: a.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                model: a.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key_env: a
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
                timeout: Duration::from_millis(a.timeout_ms.unwrap_or(DEFAULT_AI_TIMEOUT_MS)),
                max_tokens: a.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            },
            None => AiSettings::default(),
        };

        let weights_for = |profile: Profile| {
            let base = ProfileWeights::for_profile(profile);
            let overrides = self.weights.as_ref().and_then(|w| match profile {
                Profile::Government => w.government.as_ref(),
                Profile::Industry => w.industry.as_ref(),
            });
            overrides.map_or(base, |o| o.apply(base))
        };

        Ok(ResolvedConfig {
            ai,
            government_weights: weights_for(Profile::Government),
            industry_weights: weights_for(Profile::Industry),
            projection_days: self.projection_days.unwrap_or(DEFAULT_PROJECTION_DAYS),
            history_days: self.history_days.unwrap_or(DEFAULT_HISTORY_DAYS),
            data_dir: self
                .data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            store_path: self.store.clone(),
            include,
            exclude,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Ranking weights for a profile
    pub fn weights(&self, profile: Profile) -> ProfileWeights {
        match profile {
            Profile::Government => self.government_weights,
            Profile::Industry => self.industry_weights,
        }
    }

    /// Check if a zone should be part of multi-zone runs
    pub fn should_include_zone(&self, zone_id: &str) -> bool {
        if self.exclude.is_match(zone_id) {
            return false;
        }
        match self.include {
            Some(ref include) => include.is_match(zone_id),
            None => true,
        }
    }

    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        DroughtwatchConfig::default().resolve()
    }
}

/// Discover and load a config file from the project root
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(project_root: &Path) -> Result<Option<(DroughtwatchConfig, PathBuf)>> {
    for name in [".droughtwatchrc.json", "droughtwatch.config.json"] {
        let path = project_root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<DroughtwatchConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: DroughtwatchConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a project
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from the project root.
/// Returns default config if nothing is found.
pub fn load_and_resolve(project_root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(project_root)? {
            Some((config, path)) => (config, Some(path)),
            None => (DroughtwatchConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
