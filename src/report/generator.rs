//! Markdown and JSON report generation.
//!
//! This module renders a diagnosis [`Report`] for people (Markdown) and
//! for downstream tooling (JSON).

use crate::models::{
    ConsensusResult, Opinion, Report, ReportMetadata, UnitDetails, UnitFailureRecord,
    ValidationFinding,
};
use crate::trace::TraceStep;
use crate::units::display_name;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Spectrovote Consensus Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_consensus_section(
        &report.consensus,
        report.probability_percent,
    ));
    output.push_str(&generate_opinions_section(&report.opinions));
    output.push_str(&generate_failures_section(&report.failures));
    output.push_str(&generate_trace_section(&report.trace));
    output.push_str(&generate_recommendations_section(&report.recommendations));

    if let Some(ref disclaimer) = report.disclaimer {
        output.push_str(&format!("> ⚠️ **Disclaimer:** {}\n\n", disclaimer));
    }

    output.push_str(&generate_footer(&report.metadata.version));

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Engine Version:** `{}`\n", metadata.version));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Units Attempted:** {}\n",
        metadata.units_attempted
    ));
    section.push_str(&format!(
        "- **Units Succeeded:** {}\n",
        metadata.units_succeeded
    ));
    if metadata.units_failed > 0 {
        section.push_str(&format!("- **Units Failed:** {}\n", metadata.units_failed));
    }
    section.push_str(&format!("- **Duration:** {} ms\n", metadata.duration_ms));
    section.push('\n');

    section
}

fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Consensus](#consensus)\n");
    toc.push_str("- [Unit Opinions](#unit-opinions)\n");

    if !report.failures.is_empty() {
        toc.push_str("- [Failed Units](#failed-units)\n");
    }
    if !report.trace.is_empty() {
        toc.push_str("- [Reasoning Trace](#reasoning-trace)\n");
    }
    if !report.recommendations.is_empty() {
        toc.push_str("- [Recommendations](#recommendations)\n");
    }

    toc.push('\n');
    toc
}

fn generate_consensus_section(consensus: &ConsensusResult, percent: Option<u8>) -> String {
    let mut section = String::new();

    section.push_str("## Consensus\n\n");
    section.push_str(&format!(
        "### {} {} risk\n\n",
        consensus.risk_level.emoji(),
        consensus.risk_level
    ));

    section.push_str("| Probability | Confidence | Agreement |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    let probability = match percent {
        Some(p) => format!("{}%", p),
        None => format!("{:.3}", consensus.probability),
    };
    section.push_str(&format!(
        "| {} | {:.1}% | {:.1}% |\n\n",
        probability,
        consensus.confidence * 100.0,
        consensus.agreement * 100.0
    ));

    section
}

fn generate_opinions_section(opinions: &[Opinion]) -> String {
    let mut section = String::new();

    section.push_str("## Unit Opinions\n\n");

    if opinions.is_empty() {
        section.push_str("No unit produced an opinion.\n\n");
        return section;
    }

    section.push_str("| Unit | Risk | Confidence |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for opinion in opinions {
        section.push_str(&format!(
            "| {} | {} {} | {:.1}% |\n",
            display_name(&opinion.unit),
            opinion.risk_level.emoji(),
            opinion.risk_level,
            opinion.confidence * 100.0
        ));
    }
    section.push('\n');

    for opinion in opinions {
        section.push_str(&generate_opinion_block(opinion));
    }

    section
}

fn generate_opinion_block(opinion: &Opinion) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", display_name(&opinion.unit)));
    block.push_str(&format!("*{}*\n\n", opinion.summary));
    block.push_str(&format!("**Rationale:** {}\n\n", opinion.rationale));

    match &opinion.details {
        UnitDetails::Biomarker {
            score,
            pattern_match,
        } => {
            block.push_str(&format!(
                "- Biomarker score: {:.3}\n- Pattern consistency: {:.0}%\n\n",
                score,
                pattern_match * 100.0
            ));
        }
        UnitDetails::ClinicalContext {
            clinical_score,
            data_completeness,
            urgency,
            ..
        } => {
            block.push_str(&format!(
                "- Clinical score: {:.2}\n- Data completeness: {:.0}%\n- Urgency: {}\n\n",
                clinical_score,
                data_completeness * 100.0,
                urgency
            ));
        }
        UnitDetails::ProbabilisticRisk {
            probability,
            model_agreement,
            sub_models,
            feature_contributions,
        } => {
            block.push_str(&format!(
                "Ensemble probability {:.1}%, sub-model agreement {:.1}%.\n\n",
                probability * 100.0,
                model_agreement * 100.0
            ));
            block.push_str("| Sub-model | Probability | Confidence |\n");
            block.push_str("|:---|:---:|:---:|\n");
            for sub in sub_models {
                block.push_str(&format!(
                    "| {} | {:.3} | {:.2} |\n",
                    sub.model, sub.probability, sub.confidence
                ));
            }
            block.push('\n');

            let features: Vec<String> = feature_contributions
                .iter()
                .map(|f| format!("{} ({:.2})", f.feature, f.weight))
                .collect();
            block.push_str(&format!("Feature contributions: {}\n\n", features.join(", ")));
        }
        UnitDetails::DataQuality {
            quality_score,
            findings,
            ..
        } => {
            block.push_str(&format!(
                "Data quality score: {:.0}%\n\n",
                quality_score * 100.0
            ));
            block.push_str(&generate_findings_list(findings));
        }
        UnitDetails::Unspecified => {}
    }

    block.push_str("---\n\n");
    block
}

fn generate_findings_list(findings: &[ValidationFinding]) -> String {
    if findings.is_empty() {
        return "No validation findings.\n\n".to_string();
    }

    let mut list = String::new();
    for finding in findings {
        list.push_str(&format!(
            "- **{}** `{}`: {}\n",
            finding.severity, finding.field, finding.message
        ));
    }
    list.push('\n');
    list
}

fn generate_failures_section(failures: &[UnitFailureRecord]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Failed Units\n\n");
    section.push_str("These units did not contribute to the consensus.\n\n");
    for failure in failures {
        section.push_str(&format!(
            "- ❌ **{}**: {}\n",
            display_name(&failure.unit),
            failure.reason
        ));
    }
    section.push('\n');

    section
}

fn generate_trace_section(trace: &[TraceStep]) -> String {
    if trace.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Reasoning Trace\n\n");
    section.push_str("| # | Source | Step | Time |\n");
    section.push_str("|:---:|:---|:---|:---|\n");
    for step in trace {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            step.sequence,
            step.source,
            step.description.replace('|', "\\|"),
            step.timestamp.format("%H:%M:%S%.3f")
        ));
    }
    section.push('\n');

    section
}

fn generate_recommendations_section(recommendations: &[String]) -> String {
    if recommendations.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Recommendations\n\n");
    for (i, rec) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    section.push('\n');

    section
}

fn generate_footer(version: &str) -> String {
    format!("---\n\n*Report generated by Spectrovote ({})*\n", version)
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FindingSeverity, QualitySubScores, RiskCategory, SubModelPrediction,
    };
    use crate::units::{BIOMARKER_UNIT, QUALITY_UNIT, RISK_UNIT};
    use chrono::Utc;

    fn create_test_report() -> Report {
        let metadata = ReportMetadata {
            version: "spectrovote-consensus-v1.0".to_string(),
            generated_at: Utc::now(),
            duration_ms: 12,
            units_attempted: 4,
            units_succeeded: 3,
            units_failed: 1,
        };

        Report {
            metadata,
            consensus: ConsensusResult {
                probability: 0.7,
                confidence: 0.82,
                risk_level: RiskCategory::ModerateHigh,
                agreement: 0.9,
                computed_at: Utc::now(),
            },
            probability_percent: Some(70),
            opinions: vec![
                Opinion::new(
                    QUALITY_UNIT,
                    RiskCategory::Low,
                    0.875,
                    "1 warning",
                    "Data validation complete - quality 88%",
                    UnitDetails::DataQuality {
                        quality_score: 0.875,
                        sub_scores: QualitySubScores {
                            readings: 1.0,
                            demographics: 0.5,
                            cross_channel: 1.0,
                            consistency: 1.0,
                        },
                        findings: vec![ValidationFinding::warning("gender", "gender is missing")],
                    },
                ),
                Opinion::new(
                    BIOMARKER_UNIT,
                    RiskCategory::High,
                    0.79,
                    "Elevated carbonyl stretch (1.8)",
                    "Biomarker analysis complete - HIGH risk identified",
                    UnitDetails::Biomarker {
                        score: 3.3,
                        pattern_match: 1.0,
                    },
                ),
                Opinion::new(
                    RISK_UNIT,
                    RiskCategory::ModerateHigh,
                    0.84,
                    "Ensemble probability 66.5%",
                    "Risk assessment complete - 67% probability",
                    UnitDetails::ProbabilisticRisk {
                        probability: 0.665,
                        model_agreement: 0.8,
                        sub_models: vec![SubModelPrediction {
                            model: "logistic".to_string(),
                            probability: 0.31,
                            confidence: 0.85,
                        }],
                        feature_contributions: vec![],
                    },
                ),
            ],
            failures: vec![UnitFailureRecord {
                unit: "clinical_consultant".to_string(),
                reason: "unit 'clinical_consultant' failed: boom".to_string(),
            }],
            trace: vec![TraceStep {
                sequence: 1,
                source: "orchestrator".to_string(),
                description: "Diagnosis started".to_string(),
                timestamp: Utc::now(),
            }],
            recommendations: vec!["Specialist referral within 2 weeks".to_string()],
            disclaimer: Some("Research use only.".to_string()),
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Spectrovote Consensus Report"));
        assert!(markdown.contains("## Consensus"));
        assert!(markdown.contains("MODERATE_HIGH risk"));
        assert!(markdown.contains("| 70% | 82.0% | 90.0% |"));
        assert!(markdown.contains("### Biomarker Analyst"));
        assert!(markdown.contains("## Failed Units"));
        assert!(markdown.contains("## Reasoning Trace"));
        assert!(markdown.contains("1. Specialist referral within 2 weeks"));
        assert!(markdown.contains("Research use only."));
    }

    #[test]
    fn test_metadata_section_hides_zero_failures() {
        let mut metadata = create_test_report().metadata;
        assert!(generate_metadata_section(&metadata).contains("Units Failed:** 1"));

        metadata.units_failed = 0;
        let section = generate_metadata_section(&metadata);
        assert!(!section.contains("Units Failed"));
        assert!(section.contains("spectrovote-consensus-v1.0"));
    }

    #[test]
    fn test_probability_without_percent() {
        let report = create_test_report();
        let section = generate_consensus_section(&report.consensus, None);
        assert!(section.contains("| 0.700 |"));
    }

    #[test]
    fn test_findings_are_listed() {
        let findings = vec![ValidationFinding {
            severity: FindingSeverity::Critical,
            field: "age".to_string(),
            message: "age 130 outside allowed range 1-120".to_string(),
        }];
        let list = generate_findings_list(&findings);
        assert!(list.contains("`age`"));
        assert!(list.contains("outside allowed range"));
    }

    #[test]
    fn test_trace_escapes_pipes() {
        let steps = vec![TraceStep {
            sequence: 7,
            source: "risk_assessor".to_string(),
            description: "a | b".to_string(),
            timestamp: Utc::now(),
        }];
        let section = generate_trace_section(&steps);
        assert!(section.contains("| 7 | risk_assessor | a \\| b |"));
        assert!(generate_trace_section(&[]).is_empty());
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"consensus\""));
        assert!(json.contains("\"risk_level\": \"MODERATE_HIGH\""));
        assert!(json.contains("\"probability_percent\": 70"));
        assert!(json.contains("\"kind\": \"data_quality\""));
        assert!(json.contains("\"trace\""));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        write_report("# hello\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hello\n");
    }
}
