//! Clinical-context unit: demographics plus coarse channel thresholds.

use super::{
    finite_readings, load_reference_parameters, InitGate, Latency, ScoringUnit, CLINICAL_UNIT,
};
use crate::error::EngineResult;
use crate::models::{
    Gender, Observation, Opinion, RiskCategory, UnitDetails, Urgency, CHANNEL_COUNT,
};
use async_trait::async_trait;

const AGE_WEIGHT: f64 = 0.2;
const GENDER_WEIGHT: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;

/// Correlates readings with the subject's clinical context.
#[derive(Debug, Default)]
pub struct ClinicalContextUnit {
    gate: InitGate,
    latency: Latency,
}

impl ClinicalContextUnit {
    pub fn new(latency: Latency) -> Self {
        Self {
            gate: InitGate::new(),
            latency,
        }
    }
}

/// Demographic factors derived from an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClinicalContext {
    age_factor: f64,
    gender_factor: f64,
    data_completeness: f64,
    urgency: Urgency,
}

impl ClinicalContext {
    fn assess(observation: &Observation, readings: &[f64; CHANNEL_COUNT]) -> Self {
        Self {
            age_factor: age_factor(observation.age),
            gender_factor: gender_factor(observation.gender),
            data_completeness: data_completeness(observation),
            urgency: urgency(readings),
        }
    }
}

#[async_trait]
impl ScoringUnit for ClinicalContextUnit {
    fn id(&self) -> &str {
        CLINICAL_UNIT
    }

    fn specialty(&self) -> &str {
        "Clinical correlation and context"
    }

    async fn initialize(&self) -> EngineResult<()> {
        load_reference_parameters(&self.gate, &self.latency, CLINICAL_UNIT).await
    }

    fn is_initialized(&self) -> bool {
        self.gate.is_ready()
    }

    async fn analyze(&self, observation: &Observation) -> EngineResult<Opinion> {
        self.gate.ensure_ready(CLINICAL_UNIT)?;
        let readings = finite_readings(CLINICAL_UNIT, observation)?;
        self.latency.before_analysis().await;

        let context = ClinicalContext::assess(observation, &readings);
        let (clinical_score, mut reasons) = correlate(&readings, &context);
        let risk_level = score_to_risk(clinical_score);

        if context.urgency == Urgency::High {
            reasons.push("Clinical context suggests urgent evaluation needed".to_string());
        }

        let recommendations = recommendations(risk_level, context.urgency);
        let confidence = (context.data_completeness * 0.8 + 0.2).min(MAX_CONFIDENCE);
        let summary = format!(
            "Clinical correlation complete - {} risk with {} recommendations",
            risk_level,
            recommendations.len()
        );

        let rationale = if reasons.is_empty() {
            "No clinically significant elevation in the readings".to_string()
        } else {
            reasons.join(". ")
        };

        Ok(Opinion::new(
            CLINICAL_UNIT,
            risk_level,
            confidence,
            rationale,
            summary,
            UnitDetails::ClinicalContext {
                clinical_score,
                age_factor: context.age_factor,
                gender_factor: context.gender_factor,
                data_completeness: context.data_completeness,
                urgency: context.urgency,
                recommendations,
            },
        ))
    }
}

fn age_factor(age: Option<u32>) -> f64 {
    match age {
        Some(age) if age > 65 => 0.8,
        Some(age) if age > 50 => 0.6,
        Some(age) if age > 40 => 0.4,
        _ => 0.2,
    }
}

fn gender_factor(gender: Option<Gender>) -> f64 {
    match gender {
        Some(Gender::Female) => 0.6,
        _ => 0.5,
    }
}

fn data_completeness(observation: &Observation) -> f64 {
    // Readings are always present.
    let mut completeness = 0.5;
    if observation.age.map(|a| a > 0).unwrap_or(false) {
        completeness += 0.2;
    }
    if observation.gender.is_some() {
        completeness += 0.2;
    }
    if observation.has_history() {
        completeness += 0.1;
    }
    f64::min(1.0, completeness)
}

fn urgency(readings: &[f64; CHANNEL_COUNT]) -> Urgency {
    let (carbonyl, hydroxyl) = (readings[0], readings[3]);
    if carbonyl > 2.0 || hydroxyl > 3.5 {
        Urgency::High
    } else if carbonyl > 1.6 || hydroxyl > 2.8 {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

/// Risk score plus the reasons that contributed to it.
fn correlate(readings: &[f64; CHANNEL_COUNT], context: &ClinicalContext) -> (f64, Vec<String>) {
    let (carbonyl, hydroxyl) = (readings[0], readings[3]);
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if carbonyl > 1.8 {
        score += 0.4;
        reasons.push(
            "Significantly elevated carbonyl suggests strong metabolic alteration".to_string(),
        );
    } else if carbonyl > 1.4 {
        score += 0.2;
        reasons.push("Moderate carbonyl elevation indicates metabolic changes".to_string());
    }

    if hydroxyl > 3.0 {
        score += 0.3;
        reasons.push("High hydroxyl levels correlate with metabolic stress".to_string());
    }

    score += context.age_factor * AGE_WEIGHT;
    score += context.gender_factor * GENDER_WEIGHT;

    (score, reasons)
}

fn score_to_risk(score: f64) -> RiskCategory {
    if score > 0.7 {
        RiskCategory::High
    } else if score > 0.5 {
        RiskCategory::ModerateHigh
    } else if score > 0.3 {
        RiskCategory::Moderate
    } else if score > 0.15 {
        RiskCategory::LowModerate
    } else {
        RiskCategory::Low
    }
}

/// Ordered follow-up recommendations for a risk bucket and urgency.
pub fn recommendations(risk_level: RiskCategory, urgency: Urgency) -> Vec<String> {
    let mut recs: Vec<&str> = match risk_level {
        RiskCategory::High => vec![
            "Immediate specialist consultation",
            "Comprehensive metabolic panel including LDH",
            "Diagnostic imaging (CT/MRI) within 48 hours",
        ],
        RiskCategory::ModerateHigh => vec![
            "Specialist referral within 2 weeks",
            "Additional biomarker testing",
            "Follow-up spectroscopy in 1 month",
        ],
        RiskCategory::Moderate => vec![
            "Primary care follow-up",
            "Lifestyle and dietary assessment",
            "Repeat screening in 3-6 months",
        ],
        RiskCategory::LowModerate | RiskCategory::Low => vec![
            "Routine health maintenance",
            "Annual metabolic screening",
        ],
    };

    if urgency == Urgency::High {
        recs.push("Expedited evaluation recommended");
    }

    recs.into_iter().map(String::from).collect()
}
