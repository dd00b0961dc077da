//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.obstats.toml` files.

use crate::models::{MeanPolicy, Period, RecencyWindow, SortOrder};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".obstats.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Data source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Statistics settings.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "obstats_report.md".to_string()
}

/// FHIR server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the FHIR server (without a trailing `/Observation`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Page size requested from the search endpoint (`_count`).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Restrict the search to one observation code (e.g. LOINC 19935-6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
            page_size: default_page_size(),
            code: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/fhir".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> usize {
    1000
}

/// Bucketing and aggregation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Bucket granularity: "month" or "week".
    #[serde(default)]
    pub period: Period,

    /// Period order: "desc" (most recent first) or "asc".
    #[serde(default)]
    pub order: SortOrder,

    /// Missing-value handling: "treat-as-zero" or "ignore-missing".
    #[serde(default)]
    pub mean_policy: MeanPolicy,

    /// Only keep recent records, e.g. "3 months" or "6w".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<RecencyWindow>,
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Decimal places for means and thresholds.
    #[serde(default = "default_decimals")]
    pub decimals: usize,

    /// Include the 80%/50% threshold markers.
    #[serde(default = "default_true")]
    pub include_thresholds: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            include_thresholds: true,
        }
    }
}

fn default_decimals() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load configuration from `dir/.obstats.toml`.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref base_url) = args.base_url {
            self.source.base_url = base_url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.source.timeout_seconds = timeout;
        }
        if let Some(ref code) = args.code {
            self.source.code = Some(code.clone());
        }

        if let Some(period) = args.period {
            self.stats.period = period.into();
        }
        if let Some(order) = args.order {
            self.stats.order = order.into();
        }
        if let Some(policy) = args.mean_policy {
            self.stats.mean_policy = policy.into();
        }
        if let Some(window) = args.last {
            self.stats.window = Some(window);
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(decimals) = args.decimals {
            self.report.decimals = decimals;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level from `--quiet` and the merged verbose setting.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
