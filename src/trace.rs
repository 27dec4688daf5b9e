//! Reasoning trace: the ordered, append-only explanation log of a request.
//!
//! Any concurrently running task may append. Sequence numbers are
//! assigned under the same lock that pushes the step, so they are strictly
//! increasing and gap-free, and a snapshot is always a prefix of the final
//! log. Appended steps are also published on a broadcast channel so a
//! display consumer can follow the request live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Capacity of the live event channel. Slow subscribers observe `Lagged`.
const TRACE_EVENT_CAPACITY: usize = 256;

/// One step in the reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// 1-based, contiguous sequence number.
    pub sequence: u64,
    /// Component that produced the step.
    pub source: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only trace shared by every component of a request.
pub struct ReasoningTrace {
    steps: Mutex<Vec<TraceStep>>,
    events: broadcast::Sender<TraceStep>,
}

impl Default for ReasoningTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningTrace {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(TRACE_EVENT_CAPACITY);
        Self {
            steps: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Appends a step and returns its sequence number.
    pub fn append(&self, source: impl Into<String>, description: impl Into<String>) -> u64 {
        let mut steps = self.lock();
        let sequence = steps.len() as u64 + 1;
        let step = TraceStep {
            sequence,
            source: source.into(),
            description: description.into(),
            timestamp: Utc::now(),
        };
        steps.push(step.clone());
        // Published under the lock so subscribers see sequence order.
        // No receivers is fine.
        let _ = self.events.send(step);
        sequence
    }

    /// Subscribes to steps appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceStep> {
        self.events.subscribe()
    }

    /// Returns a copy of every step appended so far.
    pub fn snapshot(&self) -> Vec<TraceStep> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every step. Only called when a new top-level request starts.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceStep>> {
        // A panicking appender cannot leave the vector half-written.
        self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
