//! Scoring units.
//!
//! Each unit is an independent value implementing [`ScoringUnit`]. Units
//! must be initialized once (loading their reference parameters) before
//! `analyze` may be called; the [`InitGate`] enforces that with a ready
//! flag and a scoped lock, so concurrent or repeated initialization is
//! harmless.

pub mod biomarker;
pub mod clinical;
pub mod quality;
pub mod risk;

pub use biomarker::BiomarkerUnit;
pub use clinical::ClinicalContextUnit;
pub use quality::DataQualityUnit;
pub use risk::ProbabilisticRiskUnit;

use crate::error::{EngineError, EngineResult};
use crate::models::{Observation, Opinion, CHANNEL_COUNT};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Identifier of the biomarker unit.
pub const BIOMARKER_UNIT: &str = "biomarker_analyst";
/// Identifier of the clinical-context unit.
pub const CLINICAL_UNIT: &str = "clinical_consultant";
/// Identifier of the probabilistic-risk unit.
pub const RISK_UNIT: &str = "risk_assessor";
/// Identifier of the data-quality unit.
pub const QUALITY_UNIT: &str = "data_validator";

/// Short names accepted in configuration, for the voting units.
pub const VOTING_UNIT_NAMES: [&str; 3] = ["biomarker", "clinical", "risk"];

/// The capability shared by every scoring unit.
#[async_trait]
pub trait ScoringUnit: Send + Sync {
    /// Stable identifier used for weighting and reporting.
    fn id(&self) -> &str;

    /// Human-readable description of what the unit looks at.
    fn specialty(&self) -> &str;

    /// Loads reference parameters. Idempotent.
    async fn initialize(&self) -> EngineResult<()>;

    fn is_initialized(&self) -> bool;

    /// Maps an observation to an opinion.
    ///
    /// Fails with [`EngineError::Uninitialized`] before `initialize` completed.
    async fn analyze(&self, observation: &Observation) -> EngineResult<Opinion>;
}

/// One-time initialization gate: a ready flag plus a scoped lock.
#[derive(Debug, Default)]
pub struct InitGate {
    ready: AtomicBool,
    lock: Mutex<()>,
}

impl InitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Runs `load` unless the gate is already open.
    ///
    /// Returns `Ok(true)` if this call performed the initialization.
    pub async fn open_with<F, Fut>(&self, load: F) -> EngineResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        if self.is_ready() {
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        if self.is_ready() {
            return Ok(false);
        }

        load().await?;
        self.ready.store(true, Ordering::Release);
        Ok(true)
    }

    /// Fails with `Uninitialized` when the gate is still closed.
    pub fn ensure_ready(&self, unit: &str) -> EngineResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(EngineError::Uninitialized {
                unit: unit.to_string(),
            })
        }
    }
}

/// Test-controllable stand-in for processing latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latency {
    pub analysis: Duration,
    pub init: Duration,
}

impl Latency {
    /// No artificial delay.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_millis(analysis_ms: u64, init_ms: u64) -> Self {
        Self {
            analysis: Duration::from_millis(analysis_ms),
            init: Duration::from_millis(init_ms),
        }
    }

    pub async fn before_analysis(&self) {
        pause(self.analysis).await;
    }

    pub async fn before_init(&self) {
        pause(self.init).await;
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Shared initialization body: wait out the init latency and open the gate.
pub(crate) async fn load_reference_parameters(
    gate: &InitGate,
    latency: &Latency,
    unit: &str,
) -> EngineResult<()> {
    let performed = gate
        .open_with(move || async move {
            latency.before_init().await;
            Ok(())
        })
        .await?;

    if performed {
        debug!("{} initialized", unit);
    }
    Ok(())
}

/// Returns the readings, or a unit failure when any of them is not finite.
pub(crate) fn finite_readings(
    unit: &str,
    observation: &Observation,
) -> EngineResult<[f64; CHANNEL_COUNT]> {
    if observation.has_finite_readings() {
        Ok(observation.readings)
    } else {
        Err(EngineError::unit_failure(
            unit,
            "observation contains non-finite readings",
        ))
    }
}

/// Builds a voting unit from its configuration name or identifier.
pub fn voting_unit(name: &str, latency: Latency) -> Option<Arc<dyn ScoringUnit>> {
    match name.trim().to_lowercase().as_str() {
        "biomarker" | BIOMARKER_UNIT => Some(Arc::new(BiomarkerUnit::new(latency))),
        "clinical" | CLINICAL_UNIT => Some(Arc::new(ClinicalContextUnit::new(latency))),
        "risk" | RISK_UNIT => Some(Arc::new(ProbabilisticRiskUnit::new(latency))),
        _ => None,
    }
}

/// True when `name` selects one of the voting units.
pub fn is_voting_unit(name: &str) -> bool {
    voting_unit(name, Latency::none()).is_some()
}

/// Human-readable name for a unit identifier.
pub fn display_name(unit: &str) -> &str {
    match unit {
        BIOMARKER_UNIT => "Biomarker Analyst",
        CLINICAL_UNIT => "Clinical Consultant",
        RISK_UNIT => "Risk Assessor",
        QUALITY_UNIT => "Data Validator",
        other => other,
    }
}
