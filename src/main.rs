//! Spectrovote - weighted-consensus scoring engine
//!
//! A CLI tool that runs independent scoring units concurrently over one
//! spectroscopic observation and combines their opinions into a single
//! consensus report with a full reasoning trace.
//!
//! Exit codes:
//!   0 - Success (consensus below --fail-on, or no --fail-on set)
//!   1 - Runtime error (bad input, config, unit initialization, etc.)
//!   2 - Consensus risk at or above the --fail-on threshold
//!   3 - Consensus unavailable (no voting unit produced an opinion)

mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod orchestrator;
mod report;
mod trace;
mod units;

use anyhow::{Context, Result};
use cli::{Args, FailOnLevel, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use error::EngineError;
use indicatif::{ProgressBar, ProgressStyle};
use models::{ConsensusResult, Observation, Report, RiskCategory};
use orchestrator::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use trace::ReasoningTrace;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EXIT_THRESHOLD_MET: i32 = 2;
const EXIT_CONSENSUS_UNAVAILABLE: i32 = 3;

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

    // Load config before logging so the file can raise verbosity
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose));

    info!("Spectrovote v{}", env!("CARGO_PKG_VERSION"));
    source.log();
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Diagnosis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .spectrovote.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to choose voting units, report options and latency.");
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

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the selected workflow. Returns the process exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    config.validate()?;

    if let Some(ref path) = args.opinions {
        return run_aggregate_only(path, args.fail_on);
    }

    let observation = read_observation(&args)?;
    run_diagnosis(&config, observation, args.fail_on, !args.quiet).await
}

/// Full pipeline: initialize units, diagnose, write the report.
async fn run_diagnosis(
    config: &Config,
    observation: Observation,
    fail_on: Option<FailOnLevel>,
    show_progress: bool,
) -> Result<i32> {
    let orchestrator = Orchestrator::new(config.engine_settings());

    println!("🧪 Initializing scoring units...");
    println!("   Engine: {}", orchestrator.settings().version_tag);
    println!("   Units: {}", orchestrator.voting_unit_ids().join(", "));
    orchestrator
        .initialize()
        .await
        .context("Failed to initialize scoring units")?;

    println!("\n🔬 Running consensus analysis...");
    let trace = Arc::new(ReasoningTrace::new());
    let consumer = spawn_trace_display(&trace, show_progress);

    let result = orchestrator.diagnose_traced(observation, Arc::clone(&trace)).await;

    if !trace.is_empty() {
        debug!("Reasoning trace holds {} step(s)", trace.len());
    }

    // Closing the channel lets the consumer drain and stop.
    drop(trace);
    if let Err(e) = consumer.await {
        warn!("Trace consumer stopped abnormally: {}", e);
    }

    let report = match result {
        Ok(report) => report,
        Err(EngineError::ConsensusUnavailable {
            attempted,
            failed_units,
        }) => {
            error!("Failed units: {}", failed_units.join(", "));
            eprintln!(
                "\n⛔ Consensus unavailable: none of {} voting units produced an opinion. \
                 No risk category was assigned (exit code 3).",
                attempted
            );
            return Ok(EXIT_CONSENSUS_UNAVAILABLE);
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n📝 Generating report...");
    let output = render(&report, config.general.format)?;
    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&output, &output_path)?;

    print_summary(&report);
    println!(
        "\n✅ Diagnosis complete! Report saved to: {}",
        output_path.display()
    );

    Ok(exit_code(report.consensus.risk_level, fail_on))
}

/// Aggregate-only mode over externally produced opinions.
fn run_aggregate_only(path: &Path, fail_on: Option<FailOnLevel>) -> Result<i32> {
    println!("🗳️  Aggregating opinions from {}", path.display());

    let consensus = match aggregate_opinions_file(path)? {
        Some(consensus) => consensus,
        None => {
            eprintln!(
                "\n⛔ Consensus unavailable: the file contains no voting opinions (exit code 3)."
            );
            return Ok(EXIT_CONSENSUS_UNAVAILABLE);
        }
    };

    print_consensus(&consensus);
    Ok(exit_code(consensus.risk_level, fail_on))
}

/// Reads external votes and aggregates them. `None` when no vote counts.
fn aggregate_opinions_file(path: &Path) -> Result<Option<ConsensusResult>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read opinions file: {}", path.display()))?;
    let votes: Vec<analysis::ExternalVote> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse opinions file: {}", path.display()))?;
    debug!("Loaded {} external opinions", votes.len());

    match analysis::aggregate_votes(&votes) {
        Ok(consensus) => Ok(Some(consensus)),
        Err(e) if e.is_consensus_unavailable() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Builds the observation from --input or the inline flags.
fn read_observation(args: &Args) -> Result<Observation> {
    if let Some(ref path) = args.input {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read observation: {}", path.display()))?;
        let observation: Observation = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse observation: {}", path.display()))?;
        return Ok(observation);
    }

    let readings = args.readings.as_deref().unwrap_or_default();
    let mut observation = Observation::from_slice(readings, args.age, args.gender)?;
    if let Some(ref history) = args.history {
        observation = observation.with_history(history.clone());
    }
    Ok(observation)
}

/// Follows the trace live: every step is logged at DEBUG and, when
/// `show_progress` is set, shown on a spinner. Stops once the trace is dropped.
fn spawn_trace_display(trace: &ReasoningTrace, show_progress: bool) -> JoinHandle<()> {
    let mut events = trace.subscribe();

    let spinner = show_progress.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(step) => {
                    debug!("[{:>3}] {}: {}", step.sequence, step.source, step.description);
                    if let Some(ref pb) = spinner {
                        pb.set_message(format!("{}: {}", step.source, step.description));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Trace display fell behind, {} steps skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
    })
}

fn render(report: &Report, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => report::generate_json_report(report),
        OutputFormat::Markdown => Ok(report::generate_markdown_report(report)),
    }
}

fn exit_code(risk: RiskCategory, fail_on: Option<FailOnLevel>) -> i32 {
    match fail_on {
        Some(level) if level.is_met_by(risk) => {
            eprintln!(
                "\n⛔ Consensus risk {} is at or above {:?}. Failing (exit code 2).",
                risk, level
            );
            EXIT_THRESHOLD_MET
        }
        _ => 0,
    }
}

fn print_consensus(consensus: &ConsensusResult) {
    println!("\n📊 Consensus:");
    println!(
        "   {} {} risk",
        consensus.risk_level.emoji(),
        consensus.risk_level
    );
    println!(
        "   Probability: {:.1}% | Confidence: {:.1}% | Agreement: {:.1}%",
        consensus.probability * 100.0,
        consensus.confidence * 100.0,
        consensus.agreement * 100.0
    );
}

fn print_summary(report: &Report) {
    print_consensus(&report.consensus);
    println!(
        "   Units: {} succeeded, {} failed",
        report.metadata.units_succeeded, report.metadata.units_failed
    );
    for opinion in &report.opinions {
        println!(
            "   - {} {}: {} ({:.0}%)",
            opinion.risk_level.emoji(),
            units::display_name(&opinion.unit),
            opinion.risk_level,
            opinion.confidence * 100.0
        );
    }
    if let Some(findings) = report.opinion(units::QUALITY_UNIT).and_then(|o| o.findings()) {
        if !findings.is_empty() {
            println!("   Data quality: {} finding(s)", findings.len());
        }
    }
    println!("   Duration: {} ms", report.metadata.duration_ms);
}

/// Where the effective configuration came from.
enum ConfigSource {
    Explicit(PathBuf),
    DefaultFile,
    BuiltIn,
    Unreadable(anyhow::Error),
}

impl ConfigSource {
    /// Reports the source once logging is up.
    fn log(&self) {
        match self {
            ConfigSource::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigSource::DefaultFile => {
                info!("Loaded default config from {}", DEFAULT_CONFIG_FILE)
            }
            ConfigSource::BuiltIn => debug!("No config file found, using defaults"),
            ConfigSource::Unreadable(e) => warn!("Failed to load config: {:#}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigSource::BuiltIn)),
        Err(e) => Ok((Config::default(), ConfigSource::Unreadable(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tokio_test::assert_ok;

    #[test]
    fn test_read_inline_observation() {
        let args = Args::try_parse_from([
            "spectrovote",
            "--readings",
            "1.8,1.2,3.3,3.2",
            "--age",
            "55",
            "--gender",
            "female",
            "--history",
            "smoker",
        ])
        .unwrap();

        let observation = read_observation(&args).unwrap();
        assert_eq!(observation.readings, [1.8, 1.2, 3.3, 3.2]);
        assert_eq!(observation.age, Some(55));
        assert!(observation.has_history());
    }

    #[test]
    fn test_config_file_verbose_raises_log_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "[general]\nverbose = true\n").unwrap();
        let path = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "spectrovote",
            "--readings",
            "1,1,2,2",
            "--config",
            path,
        ])
        .unwrap();
        let (mut config, source) = load_config(&args).unwrap();
        config.merge_with_args(&args);
        assert!(matches!(source, ConfigSource::Explicit(_)));
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::DEBUG);

        let quiet = Args::try_parse_from([
            "spectrovote",
            "--readings",
            "1,1,2,2",
            "--config",
            path,
            "--quiet",
        ])
        .unwrap();
        let (mut config, _) = load_config(&quiet).unwrap();
        config.merge_with_args(&quiet);
        assert_eq!(quiet.log_level(config.general.verbose), tracing::Level::ERROR);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let args = Args::try_parse_from([
            "spectrovote",
            "--readings",
            "1,1,2,2",
            "--config",
            "/nonexistent/spectrovote.toml",
        ])
        .unwrap();
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_read_observation_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.json");
        std::fs::write(
            &path,
            r#"{"readings": [1.0, 1.0, 2.0, 2.0], "gender": "other"}"#,
        )
        .unwrap();

        let args =
            Args::try_parse_from(["spectrovote", "--input", path.to_str().unwrap()]).unwrap();
        let observation = read_observation(&args).unwrap();
        assert_eq!(observation.age, None);
        assert_eq!(observation.gender, Some(models::Gender::Other));
    }

    #[test]
    fn test_bundled_fixtures_parse() {
        let observation: Observation =
            serde_json::from_str(include_str!("../fixtures/reference_observation.json")).unwrap();
        assert_eq!(observation.readings, [1.8, 1.2, 3.3, 3.2]);

        let sparse: Observation =
            serde_json::from_str(include_str!("../fixtures/inconsistent_observation.json"))
                .unwrap();
        assert!(sparse.gender.is_none());

        let votes: Vec<analysis::ExternalVote> =
            serde_json::from_str(include_str!("../fixtures/external_votes.json")).unwrap();
        let consensus = analysis::aggregate_votes(&votes).unwrap();
        // unknown label counts as 0.5 at the default weight of 0.3
        let expected = (0.4 * 0.85 + 0.35 * 0.65 + 0.3 * 0.5) / 1.05;
        assert!((consensus.probability - expected).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_opinions_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.json");
        std::fs::write(
            &path,
            r#"[
                {"unit": "biomarker_analyst", "risk_level": "HIGH", "confidence": 0.8},
                {"unit": "clinical_consultant", "risk_level": "HIGH", "confidence": 0.9},
                {"unit": "risk_assessor", "risk_level": "HIGH", "confidence": 0.7}
            ]"#,
        )
        .unwrap();

        let consensus = aggregate_opinions_file(&path).unwrap().unwrap();
        assert!((consensus.probability - 0.85).abs() < 1e-9);
        assert_eq!(consensus.agreement, 1.0);
        assert_eq!(exit_code(consensus.risk_level, Some(FailOnLevel::High)), 2);
        assert_eq!(exit_code(consensus.risk_level, None), 0);

        std::fs::write(&path, "[]").unwrap();
        assert!(aggregate_opinions_file(&path).unwrap().is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(aggregate_opinions_file(&path).is_err());
    }

    #[test]
    fn test_diagnosis_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.output = dir.path().join("report.json").display().to_string();
        config.general.format = OutputFormat::Json;

        let observation = Observation::new(
            [1.8, 1.2, 3.3, 3.2],
            Some(55),
            Some(models::Gender::Female),
        );
        let code = tokio_test::block_on(run_diagnosis(
            &config,
            observation,
            Some(FailOnLevel::ModerateHigh),
            false,
        ));

        assert_eq!(assert_ok!(code), 2);
        let written = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        let report: Report = serde_json::from_str(&written).unwrap();
        assert_eq!(report.consensus.risk_level, RiskCategory::ModerateHigh);
        assert_eq!(report.opinions.len(), 4);
    }
}
