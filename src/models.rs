//! Data models for the consensus engine.
//!
//! This module contains the core data structures passed between the
//! scoring units, the aggregator and the report: observations, opinions,
//! consensus results and the final report.

use crate::error::{EngineError, EngineResult};
use crate::trace::TraceStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of spectroscopic channels in an observation.
pub const CHANNEL_COUNT: usize = 4;

/// Inclusive plausible range per channel, in channel order.
pub const CHANNEL_RANGES: [(f64, f64); CHANNEL_COUNT] =
    [(0.5, 3.5), (0.8, 3.8), (1.5, 4.8), (1.2, 4.2)];

/// Human-readable channel names, in channel order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = [
    "carbonyl_stretch",
    "methyl_deformation",
    "carbon_oxygen_stretch",
    "hydroxyl_stretch",
];

/// Categorical gender of the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

/// One unit of input data: four readings plus demographics.
///
/// Observations are immutable once received; the orchestrator shares
/// them with scoring tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Channel readings, in `CHANNEL_NAMES` order.
    pub readings: [f64; CHANNEL_COUNT],
    /// Age in years.
    #[serde(default)]
    pub age: Option<u32>,
    /// Categorical gender.
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Free-text history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

impl Observation {
    /// Creates an observation without history.
    pub fn new(readings: [f64; CHANNEL_COUNT], age: Option<u32>, gender: Option<Gender>) -> Self {
        Self {
            readings,
            age,
            gender,
            history: None,
        }
    }

    /// Builds an observation from a reading list of unchecked length.
    pub fn from_slice(
        readings: &[f64],
        age: Option<u32>,
        gender: Option<Gender>,
    ) -> EngineResult<Self> {
        let readings: [f64; CHANNEL_COUNT] =
            readings.try_into().map_err(|_| EngineError::InvalidObservation {
                reason: format!("expected {} readings, got {}", CHANNEL_COUNT, readings.len()),
            })?;
        Ok(Self::new(readings, age, gender))
    }

    /// Attaches free-text history.
    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = Some(history.into());
        self
    }

    /// Returns true when every reading is a finite number.
    pub fn has_finite_readings(&self) -> bool {
        self.readings.iter().all(|r| r.is_finite())
    }

    /// Returns true when a non-blank history is present.
    pub fn has_history(&self) -> bool {
        self.history
            .as_deref()
            .map(|h| !h.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Ordered risk category shared by every unit and by the consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Low,
    LowModerate,
    Moderate,
    ModerateHigh,
    High,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RiskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "LOW" => Ok(RiskCategory::Low),
            "LOW_MODERATE" => Ok(RiskCategory::LowModerate),
            "MODERATE" => Ok(RiskCategory::Moderate),
            "MODERATE_HIGH" => Ok(RiskCategory::ModerateHigh),
            "HIGH" => Ok(RiskCategory::High),
            other => Err(format!("unknown risk category '{}'", other)),
        }
    }
}

impl RiskCategory {
    /// Canonical upper-case label.
    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::LowModerate => "LOW_MODERATE",
            RiskCategory::Moderate => "MODERATE",
            RiskCategory::ModerateHigh => "MODERATE_HIGH",
            RiskCategory::High => "HIGH",
        }
    }

    /// Voted probability in whole hundredths.
    pub fn mapped_percent(&self) -> u32 {
        match self {
            RiskCategory::High => 85,
            RiskCategory::ModerateHigh => 65,
            RiskCategory::Moderate => 45,
            RiskCategory::LowModerate => 25,
            RiskCategory::Low => 10,
        }
    }

    /// Probability used when an opinion of this category is voted.
    pub fn mapped_probability(&self) -> f64 {
        f64::from(self.mapped_percent()) / 100.0
    }

    /// Buckets a probability with the inclusive 0.8/0.6/0.4/0.2 thresholds.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.8 {
            RiskCategory::High
        } else if probability >= 0.6 {
            RiskCategory::ModerateHigh
        } else if probability >= 0.4 {
            RiskCategory::Moderate
        } else if probability >= 0.2 {
            RiskCategory::LowModerate
        } else {
            RiskCategory::Low
        }
    }

    /// Returns an emoji representation of the category.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskCategory::Low => "🟢",
            RiskCategory::LowModerate => "🔵",
            RiskCategory::Moderate => "🟡",
            RiskCategory::ModerateHigh => "🟠",
            RiskCategory::High => "🔴",
        }
    }
}

/// Urgency flag raised by the clinical-context unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Low => write!(f, "LOW"),
            Urgency::Medium => write!(f, "MEDIUM"),
            Urgency::High => write!(f, "HIGH"),
        }
    }
}

/// Output of one sub-model inside the probabilistic-risk ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubModelPrediction {
    pub model: String,
    pub probability: f64,
    pub confidence: f64,
}

/// Relative importance of one input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub weight: f64,
}

/// How serious a data-quality finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Plausibility or consistency concern.
    Warning,
    /// Value outside allowed bounds or non-positive.
    Critical,
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingSeverity::Warning => write!(f, "warning"),
            FindingSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A single in-band validation finding. Findings are reported, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: FindingSeverity,
    pub field: String,
    pub message: String,
}

impl ValidationFinding {
    pub fn critical(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Critical,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: FindingSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The four data-quality sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualitySubScores {
    pub readings: f64,
    pub demographics: f64,
    pub cross_channel: f64,
    pub consistency: f64,
}

impl QualitySubScores {
    /// Unweighted mean of the four sub-scores.
    pub fn mean(&self) -> f64 {
        (self.readings + self.demographics + self.cross_channel + self.consistency) / 4.0
    }
}

/// Unit-specific auxiliary fields attached to an opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitDetails {
    Biomarker {
        score: f64,
        pattern_match: f64,
    },
    ClinicalContext {
        clinical_score: f64,
        age_factor: f64,
        gender_factor: f64,
        data_completeness: f64,
        urgency: Urgency,
        recommendations: Vec<String>,
    },
    ProbabilisticRisk {
        probability: f64,
        model_agreement: f64,
        sub_models: Vec<SubModelPrediction>,
        feature_contributions: Vec<FeatureContribution>,
    },
    DataQuality {
        quality_score: f64,
        sub_scores: QualitySubScores,
        findings: Vec<ValidationFinding>,
    },
    Unspecified,
}

/// A single unit's judgment. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    /// Identifier of the producing unit.
    pub unit: String,
    /// Categorical risk judgment.
    pub risk_level: RiskCategory,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Free-text rationale.
    pub rationale: String,
    /// One-line summary of the analysis.
    pub summary: String,
    /// Unit-specific auxiliary fields.
    pub details: UnitDetails,
    /// When the opinion was produced.
    pub created_at: DateTime<Utc>,
}

impl Opinion {
    /// Creates an opinion stamped with the current time.
    ///
    /// Confidence is clamped into [0, 1]; a non-finite confidence becomes 0.
    pub fn new(
        unit: impl Into<String>,
        risk_level: RiskCategory,
        confidence: f64,
        rationale: impl Into<String>,
        summary: impl Into<String>,
        details: UnitDetails,
    ) -> Self {
        Self {
            unit: unit.into(),
            risk_level,
            confidence: clamp_unit(confidence),
            rationale: rationale.into(),
            summary: summary.into(),
            details,
            created_at: Utc::now(),
        }
    }

    /// Recommendations carried by a clinical-context opinion, if any.
    pub fn recommendations(&self) -> Option<&[String]> {
        match &self.details {
            UnitDetails::ClinicalContext {
                recommendations, ..
            } => Some(recommendations),
            _ => None,
        }
    }

    /// Validation findings carried by a data-quality opinion, if any.
    pub fn findings(&self) -> Option<&[ValidationFinding]> {
        match &self.details {
            UnitDetails::DataQuality { findings, .. } => Some(findings),
            _ => None,
        }
    }
}

/// Clamps a value into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted combination of the voting opinions. Recomputed whole, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub probability: f64,
    pub confidence: f64,
    pub risk_level: RiskCategory,
    pub agreement: f64,
    pub computed_at: DateTime<Utc>,
}

/// A unit that failed during a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailureRecord {
    pub unit: String,
    pub reason: String,
}

/// Metadata about a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Engine version tag.
    pub version: String,
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
    /// Wall-clock duration of the request in milliseconds.
    pub duration_ms: u64,
    /// Number of units launched, validation included.
    pub units_attempted: usize,
    /// Number of units that produced an opinion.
    pub units_succeeded: usize,
    /// Number of units that failed.
    pub units_failed: usize,
}

/// The terminal artifact of one diagnosis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub consensus: ConsensusResult,
    /// Consensus probability on a rounded 0-100 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability_percent: Option<u8>,
    /// One opinion per successfully-run unit.
    pub opinions: Vec<Opinion>,
    /// Units that failed, in launch order.
    pub failures: Vec<UnitFailureRecord>,
    /// Full ordered reasoning trace.
    pub trace: Vec<TraceStep>,
    /// Follow-up recommendations.
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<String>,
}

impl Report {
    /// Returns the opinion produced by the given unit.
    pub fn opinion(&self, unit: &str) -> Option<&Opinion> {
        self.opinions.iter().find(|o| o.unit == unit)
    }
}
