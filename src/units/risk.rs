//! Probabilistic-risk unit: an internal ensemble of three sub-models.
//!
//! The sub-models run concurrently and are combined with their own
//! weighted vote. These ensemble weights are tuned independently of the
//! top-level consensus weights even though the values coincide.

use super::{finite_readings, load_reference_parameters, InitGate, Latency, ScoringUnit, RISK_UNIT};
use crate::analysis::agreement_score;
use crate::error::EngineResult;
use crate::models::{
    FeatureContribution, Observation, Opinion, RiskCategory, SubModelPrediction, UnitDetails,
    CHANNEL_COUNT,
};
use async_trait::async_trait;
use futures::future::join_all;

/// Ensemble weight of the logistic sub-model.
pub const ENSEMBLE_WEIGHT_LOGISTIC: f64 = 0.4;
/// Ensemble weight of the threshold-rule sub-model.
pub const ENSEMBLE_WEIGHT_THRESHOLD: f64 = 0.35;
/// Ensemble weight of the iterative-residual sub-model.
pub const ENSEMBLE_WEIGHT_RESIDUAL: f64 = 0.25;
/// Weight for a sub-model the ensemble does not recognize.
pub const ENSEMBLE_WEIGHT_DEFAULT: f64 = 0.33;

const LOGISTIC_WEIGHTS: [f64; CHANNEL_COUNT] = [0.35, 0.25, 0.20, 0.20];
const LOGISTIC_INTERCEPT: f64 = -2.5;

const RESIDUAL_ITERATIONS: usize = 5;
const RESIDUAL_LEARNING_RATE: f64 = 0.1;

const MAX_CONFIDENCE: f64 = 0.95;

/// Fixed per-channel importance reported alongside the ensemble.
const FEATURE_CONTRIBUTIONS: [(&str, f64); CHANNEL_COUNT] = [
    ("carbonyl_stretch", 0.35),
    ("hydroxyl_stretch", 0.28),
    ("carbon_oxygen_stretch", 0.22),
    ("methyl_deformation", 0.15),
];

/// The three sub-models of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubModel {
    Logistic,
    ThresholdRule,
    IterativeResidual,
}

impl SubModel {
    pub const ALL: [SubModel; 3] = [
        SubModel::Logistic,
        SubModel::ThresholdRule,
        SubModel::IterativeResidual,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SubModel::Logistic => "logistic",
            SubModel::ThresholdRule => "threshold_rule",
            SubModel::IterativeResidual => "iterative_residual",
        }
    }

    fn base_confidence(&self) -> f64 {
        match self {
            SubModel::Logistic => 0.85,
            SubModel::ThresholdRule => 0.88,
            SubModel::IterativeResidual => 0.87,
        }
    }

    pub fn predict(&self, readings: &[f64; CHANNEL_COUNT]) -> SubModelPrediction {
        let probability = match self {
            SubModel::Logistic => logistic_probability(readings),
            SubModel::ThresholdRule => threshold_rule_probability(readings),
            SubModel::IterativeResidual => iterative_residual_probability(readings),
        };

        SubModelPrediction {
            model: self.name().to_string(),
            probability,
            confidence: self.base_confidence(),
        }
    }
}

/// Ensemble weight for a sub-model name.
pub fn ensemble_weight(model: &str) -> f64 {
    match model {
        "logistic" => ENSEMBLE_WEIGHT_LOGISTIC,
        "threshold_rule" => ENSEMBLE_WEIGHT_THRESHOLD,
        "iterative_residual" => ENSEMBLE_WEIGHT_RESIDUAL,
        _ => ENSEMBLE_WEIGHT_DEFAULT,
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logistic_probability(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let linear: f64 = readings
        .iter()
        .zip(LOGISTIC_WEIGHTS.iter())
        .map(|(x, w)| x * w)
        .sum::<f64>()
        + LOGISTIC_INTERCEPT;
    sigmoid(linear)
}

fn threshold_rule_probability(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let (carbonyl, hydroxyl) = (readings[0], readings[3]);
    let mut probability: f64 = 0.0;

    if carbonyl > 1.7 {
        probability += 0.4;
    } else if carbonyl > 1.3 {
        probability += 0.2;
    }

    if hydroxyl > 3.0 {
        probability += 0.3;
    } else if hydroxyl > 2.4 {
        probability += 0.15;
    }

    if carbonyl > 1.7 && hydroxyl > 3.0 {
        probability += 0.2;
    }

    // base rate
    probability += 0.05;

    probability.min(0.95)
}

fn iterative_residual_probability(readings: &[f64; CHANNEL_COUNT]) -> f64 {
    let target = (if readings[0] > 1.6 { 0.8 } else { 0.2 })
        + (if readings[3] > 2.8 { 0.6 } else { 0.2 });

    let mut prediction = 0.0;
    for _ in 0..RESIDUAL_ITERATIONS {
        prediction += RESIDUAL_LEARNING_RATE * (target - prediction);
    }
    sigmoid(prediction)
}

/// Combined ensemble output.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutcome {
    pub probability: f64,
    pub agreement: f64,
    pub confidence: f64,
}

/// Weighted vote over sub-model predictions.
///
/// Expects a non-empty slice.
pub fn combine_predictions(predictions: &[SubModelPrediction]) -> EnsembleOutcome {
    let (weighted, total) = predictions.iter().fold((0.0, 0.0), |(sum, total), p| {
        let weight = ensemble_weight(&p.model);
        (sum + p.probability * weight, total + weight)
    });
    let probability = if total > 0.0 { weighted / total } else { 0.0 };

    let probabilities: Vec<f64> = predictions.iter().map(|p| p.probability).collect();
    let agreement = agreement_score(&probabilities);

    let base_confidence = if predictions.is_empty() {
        0.0
    } else {
        predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64
    };
    let confidence = (base_confidence * 0.7 + agreement * 0.3).min(MAX_CONFIDENCE);

    EnsembleOutcome {
        probability,
        agreement,
        confidence,
    }
}

/// Runs the quantitative ensemble over the readings.
#[derive(Debug, Default)]
pub struct ProbabilisticRiskUnit {
    gate: InitGate,
    latency: Latency,
}

impl ProbabilisticRiskUnit {
    pub fn new(latency: Latency) -> Self {
        Self {
            gate: InitGate::new(),
            latency,
        }
    }

    async fn run_ensemble(&self, readings: [f64; CHANNEL_COUNT]) -> Vec<SubModelPrediction> {
        let latency = self.latency;
        join_all(SubModel::ALL.into_iter().map(|model| async move {
            latency.before_analysis().await;
            model.predict(&readings)
        }))
        .await
    }
}

#[async_trait]
impl ScoringUnit for ProbabilisticRiskUnit {
    fn id(&self) -> &str {
        RISK_UNIT
    }

    fn specialty(&self) -> &str {
        "Quantitative risk modeling"
    }

    async fn initialize(&self) -> EngineResult<()> {
        load_reference_parameters(&self.gate, &self.latency, RISK_UNIT).await
    }

    fn is_initialized(&self) -> bool {
        self.gate.is_ready()
    }

    async fn analyze(&self, observation: &Observation) -> EngineResult<Opinion> {
        self.gate.ensure_ready(RISK_UNIT)?;
        let readings = finite_readings(RISK_UNIT, observation)?;

        let predictions = self.run_ensemble(readings).await;
        let outcome = combine_predictions(&predictions);
        let risk_level = RiskCategory::from_probability(outcome.probability);

        let strongest = predictions
            .iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
            .map(|p| p.model.clone())
            .unwrap_or_default();
        let rationale = format!(
            "Ensemble probability {:.1}% with {:.0}% sub-model agreement; strongest signal from {} model",
            outcome.probability * 100.0,
            outcome.agreement * 100.0,
            strongest
        );

        Ok(Opinion::new(
            RISK_UNIT,
            risk_level,
            outcome.confidence,
            rationale,
            format!(
                "Risk assessment complete - {}% probability",
                (outcome.probability * 100.0).round()
            ),
            UnitDetails::ProbabilisticRisk {
                probability: outcome.probability,
                model_agreement: outcome.agreement,
                sub_models: predictions,
                feature_contributions: FEATURE_CONTRIBUTIONS
                    .iter()
                    .map(|(feature, weight)| FeatureContribution {
                        feature: feature.to_string(),
                        weight: *weight,
                    })
                    .collect(),
            },
        ))
    }
}
