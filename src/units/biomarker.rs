//! Biomarker unit: piecewise-linear score over the four readings.

use super::{
    finite_readings, load_reference_parameters, InitGate, Latency, ScoringUnit, BIOMARKER_UNIT,
};
use crate::error::EngineResult;
use crate::models::{
    Observation, Opinion, RiskCategory, UnitDetails, CHANNEL_COUNT, CHANNEL_RANGES,
};
use async_trait::async_trait;

/// One thresholded, baseline-relative contribution to the score.
struct Contribution {
    threshold: f64,
    baseline: f64,
    weight: f64,
}

const CARBONYL: Contribution = Contribution {
    threshold: 1.6,
    baseline: 1.2,
    weight: 1.3,
};

const HYDROXYL: Contribution = Contribution {
    threshold: 2.8,
    baseline: 2.2,
    weight: 1.2,
};

const CARBON_OXYGEN: Contribution = Contribution {
    threshold: 3.2,
    baseline: 2.8,
    weight: 0.8,
};

const IMBALANCE_THRESHOLD: f64 = 0.5;
const IMBALANCE_WEIGHT: f64 = 1.1;

const MAX_CONFIDENCE: f64 = 0.95;

/// Scores channel readings against fixed metabolic patterns.
#[derive(Debug, Default)]
pub struct BiomarkerUnit {
    gate: InitGate,
    latency: Latency,
}

impl BiomarkerUnit {
    pub fn new(latency: Latency) -> Self {
        Self {
            gate: InitGate::new(),
            latency,
        }
    }
}

#[async_trait]
impl ScoringUnit for BiomarkerUnit {
    fn id(&self) -> &str {
        BIOMARKER_UNIT
    }

    fn specialty(&self) -> &str {
        "Molecular pattern analysis"
    }

    async fn initialize(&self) -> EngineResult<()> {
        load_reference_parameters(&self.gate, &self.latency, BIOMARKER_UNIT).await
    }

    fn is_initialized(&self) -> bool {
        self.gate.is_ready()
    }

    async fn analyze(&self, observation: &Observation) -> EngineResult<Opinion> {
        self.gate.ensure_ready(BIOMARKER_UNIT)?;
        let readings = finite_readings(BIOMARKER_UNIT, observation)?;
        self.latency.before_analysis().await;

        let score = biomarker_score(&readings);
        let pattern_match = pattern_consistency(&readings);
        let confidence = confidence(&readings, pattern_match);
        let risk_level = score_to_risk(score);

        Ok(Opinion::new(
            BIOMARKER_UNIT,
            risk_level,
            confidence,
            rationale(&readings, pattern_match),
            format!("Biomarker analysis complete - {} risk identified", risk_level),
            UnitDetails::Biomarker {
                score,
                pattern_match,
            },
        ))
    }
}

/// |ch0/1.2 - ch1/1.8|
fn metabolic_imbalance(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    ((readings[0] / 1.2) - (readings[1] / 1.8)).abs()
}

/// Piecewise-linear score, floored at zero.
pub fn biomarker_score(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let [carbonyl, _, carbon_oxygen, hydroxyl] = *readings;
    let mut score = 0.0;

    for (value, part) in [
        (carbonyl, &CARBONYL),
        (hydroxyl, &HYDROXYL),
        (carbon_oxygen, &CARBON_OXYGEN),
    ] {
        if value > part.threshold {
            score += (value - part.baseline) * part.weight;
        }
    }

    let imbalance = metabolic_imbalance(readings);
    if imbalance > IMBALANCE_THRESHOLD {
        score += imbalance * IMBALANCE_WEIGHT;
    }

    score.max(0.0)
}

/// Fraction of the three signature predicates that hold.
pub fn pattern_consistency(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let [carbonyl, _, carbon_oxygen, hydroxyl] = *readings;
    let patterns = [
        carbonyl > 1.5 && hydroxyl > 2.5,
        carbonyl > 1.3 && carbon_oxygen > 3.0,
        metabolic_imbalance(readings) > 0.6,
    ];

    patterns.iter().filter(|&&hit| hit).count() as f64 / patterns.len() as f64
}

fn plausible_range_score(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let in_range = readings
        .iter()
        .zip(CHANNEL_RANGES.iter())
        .all(|(value, (min, max))| value >= min && value <= max);

    if in_range {
        0.9
    } else {
        0.6
    }
}

fn biomarker_strength(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let carbonyl_high = readings[0] > 1.8;
    let hydroxyl_high = readings[3] > 3.0;

    let mut strength = 0.0;
    if carbonyl_high {
        strength += 0.4;
    }
    if hydroxyl_high {
        strength += 0.4;
    }
    if carbonyl_high && hydroxyl_high {
        strength += 0.2;
    }
    strength
}

fn confidence(readings: &[f64; CHANNEL_COUNT], pattern_match: f64) -> f64 {
    let blended = pattern_match * 0.4
        + plausible_range_score(readings) * 0.3
        + biomarker_strength(readings) * 0.3;
    blended.min(MAX_CONFIDENCE)
}

pub fn score_to_risk(score: f64) -> RiskCategory {
    if score > 2.5 {
        RiskCategory::High
    } else if score > 1.5 {
        RiskCategory::ModerateHigh
    } else if score > 0.8 {
        RiskCategory::Moderate
    } else if score > 0.3 {
        RiskCategory::LowModerate
    } else {
        RiskCategory::Low
    }
}

fn rationale(readings: &[f64; CHANNEL_COUNT], pattern_match: f64) -> String {
    let [carbonyl, _, _, hydroxyl] = *readings;
    let mut reasons = Vec::new();

    if carbonyl > CARBONYL.threshold {
        reasons.push(format!(
            "Elevated carbonyl stretch ({}) indicates altered glycolytic activity",
            carbonyl
        ));
    }
    if hydroxyl > HYDROXYL.threshold {
        reasons.push(format!(
            "High hydroxyl vibration ({}) suggests metabolic stress",
            hydroxyl
        ));
    }
    if pattern_match > 0.6 {
        reasons.push(format!(
            "Strong pattern consistency ({}%) with metabolic signatures",
            (pattern_match * 100.0).round()
        ));
    }

    if reasons.is_empty() {
        "No significant biomarkers detected".to_string()
    } else {
        reasons.join(". ")
    }
}
