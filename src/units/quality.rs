//! Data-quality unit: reports on input fitness, never on risk.
//!
//! Findings are returned in-band inside the opinion. Out-of-bounds and
//! non-positive values are critical; plausibility and consistency concerns
//! are warnings.

use super::{load_reference_parameters, InitGate, Latency, ScoringUnit, QUALITY_UNIT};
use crate::error::EngineResult;
use crate::models::{
    FindingSeverity, Observation, Opinion, QualitySubScores, RiskCategory, UnitDetails,
    ValidationFinding, CHANNEL_NAMES, CHANNEL_RANGES,
};
use async_trait::async_trait;

const MIN_AGE: u32 = 1;
const MAX_AGE: u32 = 120;

/// Channel 0 may exceed channel 2 by at most this factor.
const CARBONYL_TO_CARBON_OXYGEN_RATIO: f64 = 1.5;
/// Maximum allowed |channel0 - channel3|.
const CARBONYL_HYDROXYL_SPREAD: f64 = 2.0;

const YOUNG_AGE: u32 = 30;
const YOUNG_CARBONYL_CEILING: f64 = 2.0;

/// Result of validating one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    pub sub_scores: QualitySubScores,
    pub findings: Vec<ValidationFinding>,
}

impl QualityAssessment {
    pub fn quality_score(&self) -> f64 {
        self.sub_scores.mean()
    }

    pub fn count(&self, severity: FindingSeverity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Validates readings and demographics.
pub fn assess(observation: &Observation) -> QualityAssessment {
    let mut findings = Vec::new();

    let readings = check_readings(observation, &mut findings);
    let demographics = check_demographics(observation, &mut findings);
    let cross_channel = check_cross_channel(observation, &mut findings);
    let consistency = check_age_consistency(observation, &mut findings);

    QualityAssessment {
        sub_scores: QualitySubScores {
            readings,
            demographics,
            cross_channel,
            consistency,
        },
        findings,
    }
}

fn check_readings(observation: &Observation, findings: &mut Vec<ValidationFinding>) -> f64 {
    let mut valid = 0;

    for ((value, (min, max)), name) in observation
        .readings
        .iter()
        .zip(CHANNEL_RANGES.iter())
        .zip(CHANNEL_NAMES.iter())
    {
        if !value.is_finite() {
            findings.push(ValidationFinding::critical(*name, "reading is not a finite number"));
        } else if *value <= 0.0 {
            findings.push(ValidationFinding::critical(
                *name,
                format!("reading {} must be positive", value),
            ));
        } else if value < min || value > max {
            findings.push(ValidationFinding::critical(
                *name,
                format!("reading {} outside plausible range [{}, {}]", value, min, max),
            ));
        } else {
            valid += 1;
        }
    }

    valid as f64 / observation.readings.len() as f64
}

fn check_demographics(observation: &Observation, findings: &mut Vec<ValidationFinding>) -> f64 {
    let mut valid = 0;

    match observation.age {
        None => findings.push(ValidationFinding::warning("age", "age is missing")),
        Some(age) if !(MIN_AGE..=MAX_AGE).contains(&age) => findings.push(
            ValidationFinding::critical(
                "age",
                format!("age {} outside allowed range {}-{}", age, MIN_AGE, MAX_AGE),
            ),
        ),
        Some(_) => valid += 1,
    }

    match observation.gender {
        None => findings.push(ValidationFinding::warning("gender", "gender is missing")),
        Some(_) => valid += 1,
    }

    valid as f64 / 2.0
}

fn check_cross_channel(observation: &Observation, findings: &mut Vec<ValidationFinding>) -> f64 {
    let [carbonyl, _, carbon_oxygen, hydroxyl] = observation.readings;
    let mut passed = 0;

    // Written as positive conditions so NaN readings fail.
    if carbonyl <= carbon_oxygen * CARBONYL_TO_CARBON_OXYGEN_RATIO {
        passed += 1;
    } else {
        findings.push(ValidationFinding::warning(
            "carbonyl_stretch",
            format!(
                "carbonyl {} exceeds carbon-oxygen {} by more than 50%",
                carbonyl, carbon_oxygen
            ),
        ));
    }

    if (carbonyl - hydroxyl).abs() <= CARBONYL_HYDROXYL_SPREAD {
        passed += 1;
    } else {
        findings.push(ValidationFinding::warning(
            "hydroxyl_stretch",
            format!(
                "carbonyl {} and hydroxyl {} differ by more than {}",
                carbonyl, hydroxyl, CARBONYL_HYDROXYL_SPREAD
            ),
        ));
    }

    passed as f64 / 2.0
}

fn check_age_consistency(observation: &Observation, findings: &mut Vec<ValidationFinding>) -> f64 {
    match observation.age {
        Some(age) if age < YOUNG_AGE && observation.readings[0] > YOUNG_CARBONYL_CEILING => {
            findings.push(ValidationFinding::warning(
                "age",
                format!(
                    "carbonyl {} is atypically high for age {}",
                    observation.readings[0], age
                ),
            ));
            0.0
        }
        _ => 1.0,
    }
}

/// Validates observation fitness before scoring.
#[derive(Debug, Default)]
pub struct DataQualityUnit {
    gate: InitGate,
    latency: Latency,
}

impl DataQualityUnit {
    pub fn new(latency: Latency) -> Self {
        Self {
            gate: InitGate::new(),
            latency,
        }
    }
}

#[async_trait]
impl ScoringUnit for DataQualityUnit {
    fn id(&self) -> &str {
        QUALITY_UNIT
    }

    fn specialty(&self) -> &str {
        "Input data validation"
    }

    async fn initialize(&self) -> EngineResult<()> {
        load_reference_parameters(&self.gate, &self.latency, QUALITY_UNIT).await
    }

    fn is_initialized(&self) -> bool {
        self.gate.is_ready()
    }

    async fn analyze(&self, observation: &Observation) -> EngineResult<Opinion> {
        self.gate.ensure_ready(QUALITY_UNIT)?;
        self.latency.before_analysis().await;

        let assessment = assess(observation);
        let quality_score = assessment.quality_score();
        let critical = assessment.count(FindingSeverity::Critical);
        let warnings = assessment.count(FindingSeverity::Warning);

        let rationale = if assessment.findings.is_empty() {
            "All readings and demographics passed validation".to_string()
        } else {
            let details: Vec<String> = assessment
                .findings
                .iter()
                .map(|f| format!("{}: {}", f.field, f.message))
                .collect();
            format!(
                "{} critical, {} warning(s): {}",
                critical,
                warnings,
                details.join("; ")
            )
        };

        Ok(Opinion::new(
            QUALITY_UNIT,
            RiskCategory::Low,
            quality_score,
            rationale,
            format!(
                "Data validation complete - quality {:.0}%",
                quality_score * 100.0
            ),
            UnitDetails::DataQuality {
                quality_score,
                sub_scores: assessment.sub_scores,
                findings: assessment.findings,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    #[test]
    fn test_clean_observation() {
        let obs = Observation::new([1.8, 1.2, 3.3, 3.2], Some(55), Some(Gender::Female));
        let assessment = assess(&obs);
        assert!(assessment.findings.is_empty());
        assert_eq!(assessment.quality_score(), 1.0);
    }

    #[test]
    fn test_out_of_range_and_non_positive_are_critical() {
        let obs = Observation::new([0.0, 5.0, 3.0, 2.0], Some(40), Some(Gender::Male));
        let assessment = assess(&obs);

        assert_eq!(assessment.count(FindingSeverity::Critical), 2);
        assert_eq!(assessment.sub_scores.readings, 0.5);
        assert!(assessment.findings[0].message.contains("must be positive"));
        assert_eq!(assessment.findings[1].field, "methyl_deformation");
    }

    #[test]
    fn test_missing_demographics_are_warnings() {
        let obs = Observation::new([1.0, 1.0, 2.0, 2.0], None, None);
        let assessment = assess(&obs);

        assert_eq!(assessment.count(FindingSeverity::Warning), 2);
        assert_eq!(assessment.count(FindingSeverity::Critical), 0);
        assert_eq!(assessment.sub_scores.demographics, 0.0);
        assert!((assessment.quality_score() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_age_out_of_bounds_is_critical() {
        let obs = Observation::new([1.0, 1.0, 2.0, 2.0], Some(130), Some(Gender::Other));
        let assessment = assess(&obs);
        assert_eq!(assessment.count(FindingSeverity::Critical), 1);
        assert_eq!(assessment.sub_scores.demographics, 0.5);
    }

    #[test]
    fn test_cross_channel_and_age_rules() {
        // 3.4 > 1.6 * 1.5 and |3.4 - 1.3| > 2.0, young subject with high carbonyl
        let obs = Observation::new([3.4, 1.0, 1.6, 1.3], Some(25), Some(Gender::Female));
        let assessment = assess(&obs);

        assert_eq!(assessment.sub_scores.cross_channel, 0.0);
        assert_eq!(assessment.sub_scores.consistency, 0.0);
        assert_eq!(assessment.count(FindingSeverity::Warning), 3);
        assert_eq!(assessment.count(FindingSeverity::Critical), 0);
    }

    #[test]
    fn test_nan_reading_is_critical_and_fails_cross_checks() {
        let obs = Observation::new([f64::NAN, 1.0, 2.0, 2.0], Some(50), Some(Gender::Male));
        let assessment = assess(&obs);
        assert_eq!(assessment.count(FindingSeverity::Critical), 1);
        assert_eq!(assessment.sub_scores.cross_channel, 0.0);
    }

    #[tokio::test]
    async fn test_opinion_is_always_low_risk() {
        let unit = DataQualityUnit::new(Latency::none());
        unit.initialize().await.unwrap();

        let obs = Observation::new([3.4, 5.0, 1.6, 1.3], Some(25), None);
        let opinion = unit.analyze(&obs).await.unwrap();

        assert_eq!(opinion.unit, QUALITY_UNIT);
        assert_eq!(opinion.risk_level, RiskCategory::Low);
        assert!(opinion.confidence >= 0.0 && opinion.confidence <= 1.0);
        assert!(opinion.rationale.contains("critical"));
        assert!(!opinion.findings().unwrap().is_empty());
    }
}
