//! Engine error taxonomy.
//!
//! Unit-level failures are recovered by the task runner and recorded in
//! the report; only `ConsensusUnavailable` escapes a diagnosis request.

/// Errors raised by scoring units and the consensus engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("unit '{unit}' was invoked before initialization")]
    Uninitialized { unit: String },

    #[error("unit '{unit}' failed: {reason}")]
    UnitFailure { unit: String, reason: String },

    #[error("consensus unavailable: none of {attempted} voting units produced an opinion")]
    ConsensusUnavailable {
        attempted: usize,
        failed_units: Vec<String>,
    },

    #[error("invalid observation: {reason}")]
    InvalidObservation { reason: String },
}

impl EngineError {
    pub fn unit_failure(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::UnitFailure {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    /// True for the request-fatal consensus failure.
    pub fn is_consensus_unavailable(&self) -> bool {
        matches!(self, EngineError::ConsensusUnavailable { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::Uninitialized {
            unit: "biomarker_analyst".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unit 'biomarker_analyst' was invoked before initialization"
        );

        let err = EngineError::ConsensusUnavailable {
            attempted: 3,
            failed_units: vec!["a".into(), "b".into(), "c".into()],
        };
        assert!(err.to_string().contains("none of 3 voting units"));
        assert!(err.is_consensus_unavailable());
        assert!(!EngineError::unit_failure("x", "boom").is_consensus_unavailable());
    }
}
