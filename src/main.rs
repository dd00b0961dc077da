//! obstats - period statistics for FHIR Observation series
//!
//! Reads observations from a JSON file or a FHIR server, expands
//! multi-component records, buckets them by month or ISO week, and writes
//! a report with per-period means and all-time thresholds.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, input, fetch, malformed record, etc.)

mod analysis;
mod cli;
mod config;
mod models;
mod report;
mod source;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use models::{Observation, ReportMetadata, StatsError, StatsReport};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(config.log_level(args.quiet));

    info!("obstats v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Effective config: {:?}", config);

    if let Err(e) = run(args, config).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .obstats.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE_NAME);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the FHIR server, period, window and more.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load observations, compute statistics and write the report.
async fn run(args: Args, config: Config) -> Result<()> {
    // Step 1: Get the observations
    let (source_label, observations) = get_observations(&args, &config).await?;
    let observation_count = observations.len();

    // Step 2: Flatten and bucket
    let flat = analysis::flatten(observations);
    let record_count = flat.len();
    info!(
        "{} observations expanded to {} records",
        observation_count, record_count
    );

    let stats = &config.stats;
    let grouped = analysis::bucket(flat, stats.period, stats.window)?;
    info!(
        "Grouped into {} {} buckets",
        grouped.bucket_count(),
        stats.period
    );
    if let Some(window) = stats.window {
        info!(
            "{} of {} records fall within the last {}",
            grouped.all.len(),
            record_count,
            window
        );
    }

    // Step 3: Aggregate
    let period_stats = analysis::stats_for_period(&grouped, stats.order, stats.mean_policy);
    let all_time = match analysis::stats_all_time(&grouped.all, stats.mean_policy) {
        Ok(all_time) => all_time,
        Err(StatsError::EmptySeriesMaximum) => {
            warn!("No record carries a value; reporting no all-time data");
            None
        }
        Err(e) => return Err(e.into()),
    };
    if grouped.is_empty() {
        warn!("No records to summarize");
    }

    let report = StatsReport {
        metadata: ReportMetadata {
            source: source_label,
            generated_at: Utc::now(),
            period: stats.period,
            order: stats.order,
            mean_policy: stats.mean_policy,
            window: stats.window,
            observations: observation_count,
            records: record_count,
            records_in_window: grouped.all.len(),
            missing_values: analysis::missing_values(&grouped.all),
        },
        period_stats,
        all_time,
    };

    // Step 4: Render and save
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &config.report),
    };

    let output_path = std::path::PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_summary(&report, config.report.decimals);
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(())
}

/// Print a short summary of the report to stdout.
fn print_summary(report: &StatsReport, decimals: usize) {
    println!("\n📊 Summary:");
    println!(
        "   Records: {} | Periods: {}",
        report.metadata.records_in_window,
        report.period_stats.len()
    );
    match report.all_time {
        Some(ref stat) => println!(
            "   Best: {:.d$} | 80%: {:.d$} | 50%: {:.d$} | Mean: {:.d$}",
            stat.best,
            stat.eighty_percent,
            stat.fifty_percent,
            stat.mean,
            d = decimals
        ),
        None => println!("   No all-time data."),
    }
    if let Some(latest) = report.period_stats.first() {
        println!(
            "   First listed: {} (mean {})",
            latest.label,
            report::format_mean(latest.mean, decimals)
        );
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Runs before logging is set up, so nothing here is traced.
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // A default file that fails to parse is an error, not a fallback.
    Ok(Config::load_default()?.unwrap_or_default())
}

/// Read observations from --input or fetch them for --patient.
async fn get_observations(args: &Args, config: &Config) -> Result<(String, Vec<Observation>)> {
    if let Some(ref input) = args.input {
        println!("📄 Reading observations from {}", input.display());
        let observations = source::load_observations(input)?;
        return Ok((input.display().to_string(), observations));
    }

    let patient = args
        .patient
        .as_deref()
        .context("Either --input or --patient is required")?;

    println!(
        "📥 Fetching observations for patient {} from {}",
        patient, config.source.base_url
    );

    let mut client_config = source::FhirClientConfig::from(&config.source);
    client_config.show_progress = !args.quiet;
    let client = source::FhirClient::new(client_config)?;

    let observations = client
        .observations_for_patient(patient, config.source.code.as_deref())
        .await?;

    Ok((
        format!("Patient/{} @ {}", patient, config.source.base_url),
        observations,
    ))
}
