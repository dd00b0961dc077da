//! Markdown and JSON report generation.
//!
//! This module renders a `StatsReport` for people (Markdown) or for
//! other programs (JSON with camelCase keys).

use crate::config::ReportConfig;
use crate::models::{AllTimeStat, PeriodStat, ReportMetadata, StatsReport};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &StatsReport, config: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Observation Statistics\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_all_time_section(report.all_time.as_ref(), config));
    output.push_str(&generate_period_section(&report.period_stats, &report.metadata, config));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Source:** {}\n", metadata.source));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Period:** {}\n", metadata.period));
    section.push_str(&format!("- **Order:** {}\n", metadata.order));
    section.push_str(&format!("- **Missing values:** {}\n", metadata.mean_policy));
    if let Some(window) = metadata.window {
        section.push_str(&format!("- **Window:** last {}\n", window));
    }
    section.push_str(&format!(
        "- **Observations:** {} ({} records after expanding components)\n",
        metadata.observations, metadata.records
    ));
    if metadata.window.is_some() {
        section.push_str(&format!(
            "- **Records in window:** {}\n",
            metadata.records_in_window
        ));
    }
    if metadata.missing_values > 0 {
        section.push_str(&format!(
            "- **Records without a value:** {}\n",
            metadata.missing_values
        ));
    }
    section.push('\n');

    section
}

/// Generate the whole-series section.
fn generate_all_time_section(all_time: Option<&AllTimeStat>, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str("## All Time\n\n");

    let Some(stat) = all_time else {
        section.push_str("No data.\n\n");
        return section;
    };

    let d = config.decimals;
    if config.include_thresholds {
        section.push_str("| Best | 80% of best | 50% of best | Mean | Records |\n");
        section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
        section.push_str(&format!(
            "| {:.d$} | {:.d$} | {:.d$} | {:.d$} | {} |\n\n",
            stat.best, stat.eighty_percent, stat.fifty_percent, stat.mean, stat.count
        ));
    } else {
        section.push_str("| Best | Mean | Records |\n");
        section.push_str("|:---:|:---:|:---:|\n");
        section.push_str(&format!(
            "| {:.d$} | {:.d$} | {} |\n\n",
            stat.best, stat.mean, stat.count
        ));
    }

    section
}

/// Generate the per-period table.
fn generate_period_section(
    stats: &[PeriodStat],
    metadata: &ReportMetadata,
    config: &ReportConfig,
) -> String {
    let mut section = String::new();

    section.push_str("## By Period\n\n");

    if stats.is_empty() {
        section.push_str("No observations fall into any period.\n\n");
        return section;
    }

    let heading = match metadata.period {
        crate::models::Period::Month => "Month",
        crate::models::Period::Week => "Week",
    };
    section.push_str(&format!("| {} | Mean | Records |\n", heading));
    section.push_str("|:---|:---:|:---:|\n");

    for stat in stats {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            stat.label,
            format_mean(stat.mean, config.decimals),
            stat.count
        ));
    }
    section.push('\n');

    section
}

/// Format a mean, or "no data" when there is none.
pub fn format_mean(mean: Option<f64>, decimals: usize) -> String {
    match mean {
        Some(value) => format!("{:.*}", decimals, value),
        None => "no data".to_string(),
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by obstats v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &StatsReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
