//! Task runner: fan an observation out to scoring units and collect every
//! settled outcome.
//!
//! Each unit runs as its own tokio task. The runner never fails fast: it
//! waits for all tasks, and a unit that returns an error, panics, or is
//! cancelled is recorded as a failure while its siblings carry on.

use crate::error::EngineError;
use crate::models::{Observation, Opinion};
use crate::trace::ReasoningTrace;
use crate::units::{display_name, ScoringUnit};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Partitioned outcome of one fan-out.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub successes: Vec<(String, Opinion)>,
    pub failures: Vec<(String, EngineError)>,
}

impl RunOutcome {
    pub fn opinions(&self) -> Vec<Opinion> {
        self.successes.iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn failed_units(&self) -> Vec<String> {
        self.failures.iter().map(|(unit, _)| unit.clone()).collect()
    }

    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// Launches scoring units concurrently against a shared trace.
pub struct TaskRunner {
    trace: Arc<ReasoningTrace>,
}

impl TaskRunner {
    pub fn new(trace: Arc<ReasoningTrace>) -> Self {
        Self { trace }
    }

    /// Runs every unit and waits for all of them to settle.
    ///
    /// Outcomes keep the order in which units were given, regardless of
    /// completion order.
    pub async fn run_all(
        &self,
        units: &[Arc<dyn ScoringUnit>],
        observation: Arc<Observation>,
    ) -> RunOutcome {
        let handles: Vec<_> = units
            .iter()
            .map(|unit| {
                let unit = Arc::clone(unit);
                let observation = Arc::clone(&observation);
                let trace = Arc::clone(&self.trace);
                let id = unit.id().to_string();

                let handle = tokio::spawn(async move {
                    trace.append(
                        unit.id(),
                        format!("Starting {} ({})", display_name(unit.id()), unit.specialty()),
                    );
                    let result = unit.analyze(&observation).await;
                    match &result {
                        Ok(opinion) => {
                            trace.append(unit.id(), format!("Completed: {}", opinion.summary));
                        }
                        Err(e) => {
                            trace.append(unit.id(), format!("Failed: {}", e));
                        }
                    }
                    result
                });

                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let settled = join_all(handles).await;

        let mut outcome = RunOutcome::default();
        for (id, joined) in ids.into_iter().zip(settled) {
            match joined {
                Ok(Ok(opinion)) => {
                    debug!("{} -> {} ({:.2})", id, opinion.risk_level, opinion.confidence);
                    outcome.successes.push((id, opinion));
                }
                Ok(Err(e)) => {
                    warn!("{}", e);
                    outcome.failures.push((id, e));
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        "analysis task panicked"
                    } else {
                        "analysis task was cancelled"
                    };
                    warn!("unit '{}' failed: {}", id, reason);
                    self.trace.append(id.as_str(), format!("Failed: {}", reason));
                    outcome
                        .failures
                        .push((id.clone(), EngineError::unit_failure(id, reason)));
                }
            }
        }

        outcome
    }
}
