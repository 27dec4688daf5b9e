//! Diagnosis orchestrator.
//!
//! Sequences one request: a validation stage, a concurrent analysis stage,
//! weighted consensus, then report assembly. The orchestrator owns the
//! reasoning trace for the lifetime of a request and clears it when the
//! next request starts.

use crate::analysis::{aggregate, RunOutcome, TaskRunner};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ConsensusResult, FindingSeverity, Observation, Opinion, Report, ReportMetadata,
    UnitFailureRecord, Urgency,
};
use crate::trace::ReasoningTrace;
use crate::units::{
    clinical, voting_unit, DataQualityUnit, Latency, ScoringUnit, CLINICAL_UNIT, QUALITY_UNIT,
    VOTING_UNIT_NAMES,
};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Trace source used for the orchestrator's own steps.
const ORCHESTRATOR: &str = "orchestrator";

/// Research-use disclaimer attached to reports.
pub const DISCLAIMER: &str = "This report is produced by automated heuristics for research \
use only. It is not a medical diagnosis and must be reviewed by a qualified professional.";

/// Settings for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub version_tag: String,
    pub latency: Latency,
    /// Voting units to run, by short name or identifier.
    pub voting_units: Vec<String>,
    /// Run the data-quality unit before analysis.
    pub validate: bool,
    pub percent_probability: bool,
    pub include_trace: bool,
    pub include_disclaimer: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version_tag: "spectrovote-consensus-v1.0".to_string(),
            latency: Latency::none(),
            voting_units: VOTING_UNIT_NAMES.iter().map(|s| s.to_string()).collect(),
            validate: true,
            percent_probability: true,
            include_trace: true,
            include_disclaimer: true,
        }
    }
}

/// Coordinates scoring units for diagnosis requests.
pub struct Orchestrator {
    validator: Option<Arc<dyn ScoringUnit>>,
    voters: Vec<Arc<dyn ScoringUnit>>,
    settings: EngineSettings,
}

impl Orchestrator {
    /// Builds the configured units. Unknown unit names are skipped with a warning.
    pub fn new(settings: EngineSettings) -> Self {
        let voters: Vec<Arc<dyn ScoringUnit>> = settings
            .voting_units
            .iter()
            .filter_map(|name| {
                let unit = voting_unit(name, settings.latency);
                if unit.is_none() {
                    warn!("Unknown scoring unit '{}', skipping", name);
                }
                unit
            })
            .collect();

        let validator: Option<Arc<dyn ScoringUnit>> = if settings.validate {
            Some(Arc::new(DataQualityUnit::new(settings.latency)))
        } else {
            None
        };

        Self::with_units(validator, voters, settings)
    }

    /// Builds an orchestrator over explicit units.
    pub fn with_units(
        validator: Option<Arc<dyn ScoringUnit>>,
        voters: Vec<Arc<dyn ScoringUnit>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            validator,
            voters,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Identifiers of the voting units, in launch order.
    pub fn voting_unit_ids(&self) -> Vec<String> {
        self.voters.iter().map(|u| u.id().to_string()).collect()
    }

    fn all_units(&self) -> impl Iterator<Item = &Arc<dyn ScoringUnit>> {
        self.validator.iter().chain(self.voters.iter())
    }

    /// Initializes every unit that is not ready yet, concurrently.
    ///
    /// Fails with the first initialization error; units that did initialize
    /// stay ready.
    pub async fn initialize(&self) -> EngineResult<()> {
        let pending: Vec<_> = self.all_units().filter(|unit| !unit.is_initialized()).collect();
        if pending.is_empty() {
            debug!("All scoring units already initialized");
            return Ok(());
        }

        let results = join_all(pending.iter().map(|unit| unit.initialize())).await;
        for result in results {
            result?;
        }
        info!("Initialized {} scoring units", pending.len());
        Ok(())
    }

    /// Runs one diagnosis request with a fresh trace.
    #[cfg(test)]
    pub async fn diagnose(&self, observation: Observation) -> EngineResult<Report> {
        self.diagnose_traced(observation, Arc::new(ReasoningTrace::new())).await
    }

    /// Runs one diagnosis request, appending to `trace`.
    ///
    /// The trace is cleared first; subscribers obtained before the call
    /// observe every step of the request.
    pub async fn diagnose_traced(
        &self,
        observation: Observation,
        trace: Arc<ReasoningTrace>,
    ) -> EngineResult<Report> {
        let start = Instant::now();
        trace.clear();
        trace.append(
            ORCHESTRATOR,
            format!("Diagnosis started for readings {:?}", observation.readings),
        );

        let observation = Arc::new(observation);
        let runner = TaskRunner::new(Arc::clone(&trace));

        let validation = self.validate(&runner, &observation, &trace).await;

        trace.append(
            ORCHESTRATOR,
            format!("Launching {} analysis units in parallel", self.voters.len()),
        );
        let analysis = runner.run_all(&self.voters, Arc::clone(&observation)).await;
        debug!(
            "Analysis settled: {} succeeded, {} failed",
            analysis.successes.len(),
            analysis.failures.len()
        );

        let consensus = match aggregate(&analysis.opinions()) {
            Ok(consensus) => consensus,
            Err(EngineError::ConsensusUnavailable { .. }) => {
                let err = EngineError::ConsensusUnavailable {
                    attempted: analysis.attempted(),
                    failed_units: analysis.failed_units(),
                };
                trace.append(ORCHESTRATOR, err.to_string());
                return Err(err);
            }
            Err(e) => return Err(e),
        };

        trace.append(
            ORCHESTRATOR,
            format!(
                "Consensus: {} risk, probability {:.1}%, confidence {:.1}%, agreement {:.1}%",
                consensus.risk_level,
                consensus.probability * 100.0,
                consensus.confidence * 100.0,
                consensus.agreement * 100.0
            ),
        );

        let report = self.assemble(consensus, validation, analysis, &trace, start);
        info!(
            "Diagnosis complete: {} ({} opinions, {} failures)",
            report.consensus.risk_level,
            report.opinions.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn validate(
        &self,
        runner: &TaskRunner,
        observation: &Arc<Observation>,
        trace: &ReasoningTrace,
    ) -> RunOutcome {
        let Some(validator) = &self.validator else {
            return RunOutcome::default();
        };

        let outcome = runner
            .run_all(std::slice::from_ref(validator), Arc::clone(observation))
            .await;

        for (_, opinion) in &outcome.successes {
            let findings = opinion.findings().unwrap_or_default();
            for finding in findings
                .iter()
                .filter(|f| f.severity == FindingSeverity::Critical)
            {
                trace.append(
                    QUALITY_UNIT,
                    format!("Critical finding on {}: {}", finding.field, finding.message),
                );
            }
            if !findings.is_empty() {
                warn!("Validation reported {} finding(s)", findings.len());
            }
        }

        outcome
    }

    fn assemble(
        &self,
        consensus: ConsensusResult,
        validation: RunOutcome,
        analysis: RunOutcome,
        trace: &ReasoningTrace,
        start: Instant,
    ) -> Report {
        let settings = &self.settings;
        let units_attempted = validation.attempted() + analysis.attempted();

        let mut opinions: Vec<Opinion> = Vec::new();
        let mut failures: Vec<UnitFailureRecord> = Vec::new();
        for outcome in [validation, analysis] {
            opinions.extend(outcome.successes.into_iter().map(|(_, o)| o));
            failures.extend(outcome.failures.into_iter().map(|(unit, e)| UnitFailureRecord {
                unit,
                reason: e.to_string(),
            }));
        }

        let recommendations = opinions
            .iter()
            .find(|o| o.unit == CLINICAL_UNIT)
            .and_then(|o| o.recommendations())
            .map(|recs| recs.to_vec())
            .unwrap_or_else(|| clinical::recommendations(consensus.risk_level, Urgency::Low));

        trace.append(
            ORCHESTRATOR,
            format!("Report assembled with {} opinion(s)", opinions.len()),
        );

        let metadata = ReportMetadata {
            version: settings.version_tag.clone(),
            generated_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            units_attempted,
            units_succeeded: opinions.len(),
            units_failed: failures.len(),
        };

        Report {
            metadata,
            probability_percent: settings
                .percent_probability
                .then(|| (consensus.probability * 100.0).round() as u8),
            consensus,
            opinions,
            failures,
            trace: if settings.include_trace {
                trace.snapshot()
            } else {
                Vec::new()
            },
            recommendations,
            disclaimer: settings.include_disclaimer.then(|| DISCLAIMER.to_string()),
        }
    }
}
