//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.spectrovote.toml` files.

use crate::cli::{Args, OutputFormat};
use crate::orchestrator::EngineSettings;
use crate::units::{is_voting_unit, Latency, VOTING_UNIT_NAMES};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".spectrovote.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

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

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            format: OutputFormat::default(),
        }
    }
}

fn default_output() -> String {
    "spectrovote_report.md".to_string()
}

/// Consensus engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version tag stamped on every report.
    #[serde(default = "default_version_tag")]
    pub version_tag: String,

    /// Voting units to run.
    #[serde(default = "default_units")]
    pub units: Vec<String>,

    /// Skip the data-quality stage.
    #[serde(default)]
    pub skip_validation: bool,

    /// Simulated latency per analysis, in milliseconds.
    #[serde(default)]
    pub analysis_latency_ms: u64,

    /// Simulated latency per unit initialization, in milliseconds.
    #[serde(default)]
    pub init_latency_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version_tag: default_version_tag(),
            units: default_units(),
            skip_validation: false,
            analysis_latency_ms: 0,
            init_latency_ms: 0,
        }
    }
}

fn default_version_tag() -> String {
    "spectrovote-consensus-v1.0".to_string()
}

fn default_units() -> Vec<String> {
    VOTING_UNIT_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include the full reasoning trace.
    #[serde(default = "default_true")]
    pub include_trace: bool,

    /// Add the probability on a 0-100 scale.
    #[serde(default = "default_true")]
    pub percent_probability: bool,

    /// Attach the research-use disclaimer.
    #[serde(default = "default_true")]
    pub include_disclaimer: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_trace: true,
            percent_probability: true,
            include_disclaimer: true,
        }
    }
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

    /// Try to load `.spectrovote.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values the CLI provides explicitly override the config.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if let Some(ref units) = args.units {
            self.engine.units = units
                .iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(latency) = args.latency_ms {
            self.engine.analysis_latency_ms = latency;
        }

        // Flags always override
        if args.skip_validation {
            self.engine.skip_validation = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.engine.units.is_empty() {
            bail!("At least one voting unit must be enabled");
        }
        for unit in &self.engine.units {
            if !is_voting_unit(unit) {
                bail!(
                    "Unknown voting unit '{}' (expected one of: {})",
                    unit,
                    VOTING_UNIT_NAMES.join(", ")
                );
            }
        }
        if self.engine.version_tag.trim().is_empty() {
            bail!("engine.version_tag must not be empty");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            version_tag: self.engine.version_tag.clone(),
            latency: Latency::from_millis(
                self.engine.analysis_latency_ms,
                self.engine.init_latency_ms,
            ),
            voting_units: self.engine.units.clone(),
            validate: !self.engine.skip_validation,
            percent_probability: self.report.percent_probability,
            include_trace: self.report.include_trace,
            include_disclaimer: self.report.include_disclaimer,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, "spectrovote_report.md");
        assert_eq!(config.engine.version_tag, "spectrovote-consensus-v1.0");
        assert_eq!(config.engine.units, vec!["biomarker", "clinical", "risk"]);
        assert!(config.report.include_trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.json"
verbose = true
format = "json"

[engine]
units = ["biomarker", "risk"]
analysis_latency_ms = 25

[report]
include_disclaimer = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.json");
        assert!(config.general.verbose);
        assert_eq!(config.general.format, OutputFormat::Json);
        assert_eq!(config.engine.units, vec!["biomarker", "risk"]);
        assert!(!config.engine.skip_validation);
        assert!(!config.report.include_disclaimer);
        assert!(config.report.percent_probability);

        let settings = config.engine_settings();
        assert_eq!(settings.latency, Latency::from_millis(25, 0));
        assert!(settings.validate);
    }

    #[test]
    fn test_validate_rejects_unknown_unit() {
        let mut config = Config::default();
        config.engine.units.push("oracle".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown voting unit 'oracle'"));

        config.engine.units.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let args = Args::try_parse_from([
            "spectrovote",
            "--readings",
            "1,1,2,2",
            "--units",
            "clinical, ,risk",
            "--latency-ms",
            "40",
            "--skip-validation",
            "--format",
            "json",
        ])
        .unwrap();

        let mut config = Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.engine.units, vec!["clinical", "risk"]);
        assert_eq!(config.engine.analysis_latency_ms, 40);
        assert!(config.engine.skip_validation);
        assert_eq!(config.general.format, OutputFormat::Json);
        // not given on the command line
        assert_eq!(config.general.output, "spectrovote_report.md");
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[engine]\nversion_tag = \"lab-build\"\n",
        )
        .unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.engine.version_tag, "lab-build");

        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[engine\n").unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[report]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.units.len(), 3);
    }
}
