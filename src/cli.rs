//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{Gender, RiskCategory, CHANNEL_COUNT};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Spectrovote - weighted-consensus scoring for spectroscopic observations
///
/// Runs several independent scoring units concurrently over one
/// observation and combines their opinions into a single probability,
/// confidence and agreement score, with a full reasoning trace.
///
/// Examples:
///   spectrovote --readings 1.8,1.2,3.3,3.2 --age 55 --gender female
///   spectrovote --input observation.json --format json -o report.json
///   spectrovote --opinions votes.json
///   spectrovote --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON file containing one observation
    ///
    /// Shape: {"readings": [a, b, c, d], "age": 55, "gender": "female", "history": "..."}
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["readings", "opinions"])]
    pub input: Option<PathBuf>,

    /// The four channel readings (comma-separated)
    ///
    /// Example: --readings 1.8,1.2,3.3,3.2
    #[arg(long, value_name = "A,B,C,D", value_delimiter = ',', allow_negative_numbers = true)]
    pub readings: Option<Vec<f64>>,

    /// Subject age in years (used with --readings)
    #[arg(long, value_name = "YEARS")]
    pub age: Option<u32>,

    /// Subject gender: male, female or other (used with --readings)
    #[arg(long, value_name = "GENDER")]
    pub gender: Option<Gender>,

    /// Free-text history (used with --readings)
    #[arg(long, value_name = "TEXT")]
    pub history: Option<String>,

    /// Aggregate externally produced opinions instead of running units
    ///
    /// JSON list of {"unit": "...", "risk_level": "HIGH", "confidence": 0.8}.
    /// Unknown risk labels count as probability 0.5, unknown units weigh 0.3.
    #[arg(long, value_name = "FILE", conflicts_with = "readings")]
    pub opinions: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Default: from config or spectrovote_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .spectrovote.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (includes live reasoning steps)
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Simulated per-analysis latency in milliseconds
    #[arg(long, value_name = "MS", env = "SPECTROVOTE_LATENCY_MS")]
    pub latency_ms: Option<u64>,

    /// Voting units to run (comma-separated)
    ///
    /// Values: biomarker, clinical, risk. Default: all three.
    #[arg(long, value_name = "UNITS", value_delimiter = ',')]
    pub units: Option<Vec<String>>,

    /// Skip the data-quality validation stage
    #[arg(long)]
    pub skip_validation: bool,

    /// Fail if the consensus risk is at or above this level
    ///
    /// Useful for pipelines. Exit code 2 when the threshold is met.
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Generate a default .spectrovote.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Risk threshold for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    LowModerate,
    Moderate,
    ModerateHigh,
    High,
}

impl FailOnLevel {
    pub fn risk_category(self) -> RiskCategory {
        match self {
            FailOnLevel::Low => RiskCategory::Low,
            FailOnLevel::LowModerate => RiskCategory::LowModerate,
            FailOnLevel::Moderate => RiskCategory::Moderate,
            FailOnLevel::ModerateHigh => RiskCategory::ModerateHigh,
            FailOnLevel::High => RiskCategory::High,
        }
    }

    /// True when `risk` meets or exceeds this threshold.
    pub fn is_met_by(self, risk: RiskCategory) -> bool {
        risk >= self.risk_category()
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

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        let sources = [
            self.input.is_some(),
            self.readings.is_some(),
            self.opinions.is_some(),
        ]
        .iter()
        .filter(|&&given| given)
        .count();
        if sources != 1 {
            return Err("Provide exactly one of --input, --readings or --opinions".to_string());
        }

        if let Some(ref readings) = self.readings {
            if readings.len() != CHANNEL_COUNT {
                return Err(format!(
                    "--readings expects {} values, got {}",
                    CHANNEL_COUNT,
                    readings.len()
                ));
            }
        } else if self.age.is_some() || self.gender.is_some() || self.history.is_some() {
            return Err("--age, --gender and --history require --readings".to_string());
        }

        for path in [&self.input, &self.opinions].into_iter().flatten() {
            if !path.is_file() {
                return Err(format!("Input file does not exist: {}", path.display()));
            }
        }

        if let Some(ref units) = self.units {
            if units.iter().all(|u| u.trim().is_empty()) {
                return Err("--units must name at least one unit".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the config file's `general.verbose`; `--quiet` wins over both.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
