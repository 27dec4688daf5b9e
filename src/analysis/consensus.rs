//! Weighted consensus over unit opinions.
//!
//! Each voting opinion is mapped to a probability through its risk
//! category and weighted by the identity of its unit. Weights of absent
//! units are simply left out: dividing by the sum of the weights actually
//! present performs the normalization.
//!
//! Weights and mapped probabilities are whole hundredths, so the weighted
//! vote is an exact integer and the only rounding is the final division.

use crate::error::{EngineError, EngineResult};
use crate::models::{clamp_unit, ConsensusResult, Opinion, RiskCategory};
use crate::units::{BIOMARKER_UNIT, CLINICAL_UNIT, QUALITY_UNIT, RISK_UNIT};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Consensus weight of the biomarker unit, in hundredths.
pub const CONSENSUS_WEIGHT_BIOMARKER: u32 = 40;
/// Consensus weight of the clinical-context unit, in hundredths.
pub const CONSENSUS_WEIGHT_CLINICAL: u32 = 35;
/// Consensus weight of the probabilistic-risk unit, in hundredths.
pub const CONSENSUS_WEIGHT_RISK: u32 = 25;
/// Consensus weight of any unit not listed above, in hundredths.
pub const CONSENSUS_WEIGHT_DEFAULT: u32 = 30;

/// Probability, in hundredths, assigned to a risk label that is not recognized.
pub const UNKNOWN_CATEGORY_PERCENT: u32 = 50;

/// Consensus weight for a unit identifier, in hundredths.
pub fn consensus_weight(unit: &str) -> u32 {
    match unit {
        BIOMARKER_UNIT => CONSENSUS_WEIGHT_BIOMARKER,
        CLINICAL_UNIT => CONSENSUS_WEIGHT_CLINICAL,
        RISK_UNIT => CONSENSUS_WEIGHT_RISK,
        _ => CONSENSUS_WEIGHT_DEFAULT,
    }
}

/// Mapped probability, in hundredths, for a free-form risk label.
pub fn label_percent(label: &str) -> u32 {
    label
        .parse::<RiskCategory>()
        .map(|category| category.mapped_percent())
        .unwrap_or(UNKNOWN_CATEGORY_PERCENT)
}

/// An opinion supplied by an external collaborator, with a free-form label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalVote {
    pub unit: String,
    pub risk_level: String,
    pub confidence: f64,
}

/// One weighted entry in the vote.
#[derive(Debug, Clone, Copy)]
struct Ballot {
    weight: u32,
    percent: u32,
    confidence: f64,
}

/// Aggregates unit opinions. Data-quality opinions never vote.
///
/// Fails with `ConsensusUnavailable` when no voting opinion is present.
pub fn aggregate(opinions: &[Opinion]) -> EngineResult<ConsensusResult> {
    let ballots: Vec<Ballot> = opinions
        .iter()
        .filter(|opinion| opinion.unit != QUALITY_UNIT)
        .map(|opinion| Ballot {
            weight: consensus_weight(&opinion.unit),
            percent: opinion.risk_level.mapped_percent(),
            confidence: opinion.confidence,
        })
        .collect();

    tally(ballots)
}

/// Aggregates externally produced votes.
pub fn aggregate_votes(votes: &[ExternalVote]) -> EngineResult<ConsensusResult> {
    let ballots: Vec<Ballot> = votes
        .iter()
        .filter(|vote| vote.unit != QUALITY_UNIT)
        .map(|vote| Ballot {
            weight: consensus_weight(&vote.unit),
            percent: label_percent(&vote.risk_level),
            confidence: clamp_unit(vote.confidence),
        })
        .collect();

    tally(ballots)
}

fn tally(mut ballots: Vec<Ballot>) -> EngineResult<ConsensusResult> {
    if ballots.is_empty() {
        return Err(EngineError::ConsensusUnavailable {
            attempted: 0,
            failed_units: Vec::new(),
        });
    }

    // Float sums below run in this order, never in arrival order.
    ballots.sort_by(|a, b| {
        a.weight
            .cmp(&b.weight)
            .then(a.percent.cmp(&b.percent))
            .then(a.confidence.total_cmp(&b.confidence))
    });

    let total_weight: u32 = ballots.iter().map(|b| b.weight).sum();
    let weighted_percent: u32 = ballots.iter().map(|b| b.weight * b.percent).sum();
    let probability = f64::from(weighted_percent) / (f64::from(total_weight) * 100.0);
    let confidence = ballots
        .iter()
        .map(|b| f64::from(b.weight) * b.confidence)
        .sum::<f64>()
        / f64::from(total_weight);

    let probabilities: Vec<f64> = ballots
        .iter()
        .map(|b| f64::from(b.percent) / 100.0)
        .collect();
    let probability = clamp_unit(probability);

    Ok(ConsensusResult {
        probability,
        confidence: clamp_unit(confidence),
        risk_level: RiskCategory::from_probability(probability),
        agreement: agreement_score(&probabilities),
        computed_at: Utc::now(),
    })
}

/// `max(0, 1 - population standard deviation)`; 1 for zero or one value.
pub fn agreement_score(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 1.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    (1.0 - variance.sqrt()).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitDetails;

    const EPS: f64 = 1e-9;

    fn opinion(unit: &str, risk_level: RiskCategory, confidence: f64) -> Opinion {
        Opinion::new(unit, risk_level, confidence, "", "", UnitDetails::Unspecified)
    }

    const CATEGORIES: [RiskCategory; 5] = [
        RiskCategory::Low,
        RiskCategory::LowModerate,
        RiskCategory::Moderate,
        RiskCategory::ModerateHigh,
        RiskCategory::High,
    ];

    fn assert_same(a: &ConsensusResult, b: &ConsensusResult) {
        assert_eq!(a.probability, b.probability);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.agreement, b.agreement);
        assert_eq!(a.risk_level, b.risk_level);
    }

    fn permutations(items: &[Opinion]) -> Vec<Vec<Opinion>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first.clone());
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_unanimous_high() {
        let opinions = vec![
            opinion(BIOMARKER_UNIT, RiskCategory::High, 0.8),
            opinion(CLINICAL_UNIT, RiskCategory::High, 0.9),
            opinion(RISK_UNIT, RiskCategory::High, 0.85),
        ];
        let result = aggregate(&opinions).unwrap();

        assert!((result.probability - 0.85).abs() < EPS);
        assert_eq!(result.agreement, 1.0);
        assert_eq!(result.risk_level, RiskCategory::High);
        // 0.4 * 0.8 + 0.35 * 0.9 + 0.25 * 0.85
        assert!((result.confidence - 0.8475).abs() < EPS);
    }

    #[test]
    fn test_reference_mix() {
        let opinions = vec![
            opinion(BIOMARKER_UNIT, RiskCategory::High, 0.79),
            opinion(CLINICAL_UNIT, RiskCategory::ModerateHigh, 0.92),
            opinion(RISK_UNIT, RiskCategory::ModerateHigh, 0.84),
        ];
        let result = aggregate(&opinions).unwrap();

        // 0.4 * 0.85 + 0.35 * 0.65 + 0.25 * 0.65
        assert!((result.probability - 0.73).abs() < EPS);
        assert_eq!(result.risk_level, RiskCategory::ModerateHigh);
        let expected_agreement = 1.0 - (0.0008f64 * 100.0 / 9.0).sqrt();
        assert!((result.agreement - expected_agreement).abs() < 1e-6);
    }

    #[test]
    fn test_single_opinion_keeps_its_probability() {
        let result = aggregate(&[opinion(CLINICAL_UNIT, RiskCategory::Moderate, 0.6)]).unwrap();
        assert_eq!(result.probability, RiskCategory::Moderate.mapped_probability());
        assert_eq!(result.agreement, 1.0);
        assert!((result.confidence - 0.6).abs() < EPS);
    }

    #[test]
    fn test_missing_unit_weight_is_omitted() {
        let opinions = vec![
            opinion(BIOMARKER_UNIT, RiskCategory::High, 0.8),
            opinion(RISK_UNIT, RiskCategory::Low, 0.6),
        ];
        let result = aggregate(&opinions).unwrap();
        let expected = (0.4 * 0.85 + 0.25 * 0.10) / 0.65;
        assert!((result.probability - expected).abs() < EPS);
    }

    #[test]
    fn test_order_independence() {
        let mut opinions = vec![
            opinion(BIOMARKER_UNIT, RiskCategory::LowModerate, 0.7),
            opinion(CLINICAL_UNIT, RiskCategory::High, 0.9),
            opinion(RISK_UNIT, RiskCategory::Moderate, 0.5),
            opinion("external_panel", RiskCategory::ModerateHigh, 0.4),
        ];
        let forward = aggregate(&opinions).unwrap();
        opinions.reverse();
        let backward = aggregate(&opinions).unwrap();
        opinions.swap(0, 2);
        let shuffled = aggregate(&opinions).unwrap();

        assert_same(&forward, &backward);
        assert_same(&forward, &shuffled);
    }

    #[test]
    fn test_data_quality_opinion_does_not_vote() {
        let opinions = vec![
            opinion(QUALITY_UNIT, RiskCategory::Low, 1.0),
            opinion(BIOMARKER_UNIT, RiskCategory::High, 0.8),
        ];
        let result = aggregate(&opinions).unwrap();
        assert_eq!(result.probability, 0.85);
        assert_eq!(result.agreement, 1.0);
    }

    #[test]
    fn test_empty_set_is_unavailable() {
        assert!(matches!(
            aggregate(&[]),
            Err(EngineError::ConsensusUnavailable { .. })
        ));
        assert!(aggregate(&[opinion(QUALITY_UNIT, RiskCategory::Low, 1.0)]).is_err());
    }

    #[test]
    fn test_external_votes_use_fallbacks() {
        let votes = vec![
            ExternalVote {
                unit: "second_reader".to_string(),
                risk_level: "SEVERE".to_string(),
                confidence: 1.4,
            },
            ExternalVote {
                unit: BIOMARKER_UNIT.to_string(),
                risk_level: "low".to_string(),
                confidence: 0.5,
            },
        ];
        let result = aggregate_votes(&votes).unwrap();

        assert_eq!(label_percent("SEVERE"), UNKNOWN_CATEGORY_PERCENT);
        let expected = (0.3 * 0.5 + 0.4 * 0.10) / 0.7;
        assert!((result.probability - expected).abs() < EPS);
        // confidence clamped to 1.0 before weighting
        assert!((result.confidence - (0.3 * 1.0 + 0.4 * 0.5) / 0.7).abs() < EPS);
    }

    #[test]
    fn test_agreement_floor() {
        assert_eq!(agreement_score(&[]), 1.0);
        assert_eq!(agreement_score(&[0.3, 0.3, 0.3]), 1.0);
        let spread = agreement_score(&[0.10, 0.85]);
        assert!((spread - 0.625).abs() < EPS);
        assert!(agreement_score(&[0.0, 4.0]) == 0.0);
    }

    #[test]
    fn test_bounds_hold() {
        for a in CATEGORIES {
            for b in CATEGORIES {
                let result = aggregate(&[
                    opinion(BIOMARKER_UNIT, a, 0.95),
                    opinion(CLINICAL_UNIT, b, 0.0),
                ])
                .unwrap();
                assert!((0.0..=1.0).contains(&result.probability));
                assert!((0.0..=1.0).contains(&result.confidence));
                assert!((0.0..=1.0).contains(&result.agreement));
            }
        }
    }

    #[test]
    fn test_exact_high_threshold_in_every_order() {
        // 0.4 * 0.85 + 0.35 * 0.85 + 0.25 * 0.65 = 0.8
        let opinions = vec![
            opinion(BIOMARKER_UNIT, RiskCategory::High, 0.81),
            opinion(CLINICAL_UNIT, RiskCategory::High, 0.74),
            opinion(RISK_UNIT, RiskCategory::ModerateHigh, 0.66),
        ];
        let orders = permutations(&opinions);
        assert_eq!(orders.len(), 6);

        let expected = aggregate(&opinions).unwrap();
        for order in &orders {
            let result = aggregate(order).unwrap();
            assert_eq!(result.probability, 0.8);
            assert_eq!(result.risk_level, RiskCategory::High);
            assert_same(&result, &expected);
        }
    }

    #[test]
    fn test_single_opinion_is_exact_for_every_weight() {
        for unit in [BIOMARKER_UNIT, CLINICAL_UNIT, RISK_UNIT, "second_reader"] {
            for category in CATEGORIES {
                let result = aggregate(&[opinion(unit, category, 0.5)]).unwrap();
                assert_eq!(result.probability, category.mapped_probability());
                assert_eq!(result.risk_level, RiskCategory::from_probability(result.probability));
                assert_eq!(result.agreement, 1.0);
            }
        }
        let low = aggregate(&[opinion(BIOMARKER_UNIT, RiskCategory::Low, 0.5)]).unwrap();
        assert_eq!(low.probability, 0.1);
    }

    #[test]
    fn test_mapped_probabilities_match_literals() {
        let literals = [0.10, 0.25, 0.45, 0.65, 0.85];
        for (category, literal) in CATEGORIES.iter().zip(literals) {
            assert_eq!(category.mapped_probability(), literal);
        }
    }
}
