//! Analysis modules.
//!
//! The task runner fans an observation out to scoring units and collects
//! every settled outcome; the consensus module folds the successful
//! opinions into one weighted judgment.

pub mod consensus;
pub mod runner;

pub use consensus::{aggregate, aggregate_votes, agreement_score, ExternalVote};
pub use runner::{RunOutcome, TaskRunner};
