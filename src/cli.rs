//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{MeanPolicy, Period, RecencyWindow, SortOrder};
use clap::Parser;
use std::path::PathBuf;

/// obstats - period statistics for FHIR Observation series
///
/// Flattens multi-component observations, buckets them by month or ISO
/// week, and reports per-period means plus the all-time best value with
/// 80% / 50% threshold markers.
///
/// Examples:
///   obstats --input observations.json
///   obstats --input bundle.json --period week --last 3m --format json
///   obstats --patient SMART-1288992 --base-url https://fhir.example.org/r4 --code 19935-6
///   obstats --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON file with observations
    ///
    /// Either a FHIR Bundle, an array of Observation resources,
    /// or a single Observation.
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["patient", "init_config"],
        conflicts_with = "patient"
    )]
    pub input: Option<PathBuf>,

    /// Patient id to fetch observations for from the FHIR server
    #[arg(short, long, value_name = "ID")]
    pub patient: Option<String>,

    /// FHIR server base URL
    ///
    /// Can also be set via OBSTATS_FHIR_URL env var or .obstats.toml config.
    #[arg(long, value_name = "URL", env = "OBSTATS_FHIR_URL")]
    pub base_url: Option<String>,

    /// Only fetch observations with this code (e.g. 19935-6)
    #[arg(long, value_name = "CODE")]
    pub code: Option<String>,

    /// Bucket granularity
    #[arg(long, value_name = "PERIOD")]
    pub period: Option<PeriodArg>,

    /// Order of the per-period statistics
    #[arg(long, value_name = "ORDER")]
    pub order: Option<OrderArg>,

    /// How records without a value enter the mean
    #[arg(long, value_name = "POLICY")]
    pub mean_policy: Option<MeanPolicyArg>,

    /// Only keep records newer than this window (e.g. 3m, 6w, "2 months")
    #[arg(long, value_name = "WINDOW")]
    pub last: Option<RecencyWindow>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Decimal places for means and thresholds
    #[arg(long, value_name = "N")]
    pub decimals: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .obstats.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Generate a default .obstats.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Bucket granularity for --period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PeriodArg {
    Month,
    Week,
}

impl From<PeriodArg> for Period {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Month => Period::Month,
            PeriodArg::Week => Period::Week,
        }
    }
}

/// Sort order for --order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for SortOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Asc => SortOrder::Asc,
            OrderArg::Desc => SortOrder::Desc,
        }
    }
}

/// Missing-value policy for --mean-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MeanPolicyArg {
    TreatAsZero,
    IgnoreMissing,
}

impl From<MeanPolicyArg> for MeanPolicy {
    fn from(arg: MeanPolicyArg) -> Self {
        match arg {
            MeanPolicyArg::TreatAsZero => MeanPolicy::TreatAsZero,
            MeanPolicyArg::IgnoreMissing => MeanPolicy::IgnoreMissing,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match (&self.input, &self.patient) {
            (None, None) => {
                return Err("Either --input or --patient is required".to_string());
            }
            (Some(input), _) => {
                if !input.is_file() {
                    return Err(format!("Input file does not exist: {}", input.display()));
                }
            }
            (None, Some(patient)) => {
                if patient.trim().is_empty() {
                    return Err("Patient id must not be empty".to_string());
                }
            }
        }

        // Validate FHIR URL format
        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("FHIR base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(decimals) = self.decimals {
            if decimals > 6 {
                return Err("Decimals must be between 0 and 6".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            input: None,
            patient: Some("patient-1".to_string()),
            base_url: None,
            code: None,
            period: None,
            order: None,
            mean_policy: None,
            last: None,
            output: None,
            format: OutputFormat::Markdown,
            decimals: None,
            config: None,
            verbose: false,
            quiet: false,
            timeout: None,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "obstats",
            "--patient",
            "p-7",
            "--period",
            "week",
            "--order",
            "asc",
            "--mean-policy",
            "ignore-missing",
            "--last",
            "3m",
        ])
        .unwrap();

        assert_eq!(args.patient.as_deref(), Some("p-7"));
        assert_eq!(args.period, Some(PeriodArg::Week));
        assert_eq!(args.order, Some(OrderArg::Asc));
        assert_eq!(args.mean_policy, Some(MeanPolicyArg::IgnoreMissing));
        assert_eq!(args.last, Some(RecencyWindow::new(3, Period::Month).unwrap()));
        assert_eq!(args.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_bad_window_is_rejected_by_parser() {
        let result = Args::try_parse_from(["obstats", "--patient", "p", "--last", "3 days"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_period_is_rejected_by_parser() {
        let result = Args::try_parse_from(["obstats", "--patient", "p", "--period", "year"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_requires_a_source() {
        let mut args = make_args();
        args.patient = None;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_input_file() {
        let mut args = make_args();
        args.patient = None;
        args.input = Some(PathBuf::from("/definitely/not/here.json"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.base_url = Some("fhir.example.org".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_enum_args_map_to_models() {
        assert_eq!(Period::from(PeriodArg::Week), Period::Week);
        assert_eq!(SortOrder::from(OrderArg::Desc), SortOrder::Desc);
        assert_eq!(
            MeanPolicy::from(MeanPolicyArg::TreatAsZero),
            MeanPolicy::TreatAsZero
        );
    }
}
