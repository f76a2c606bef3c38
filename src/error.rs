//! Error types for the DMPC solver.
//!
//! Only problems that prevent a solve from starting are errors. Infeasible
//! QP steps, timeouts and collision residuals are reported through
//! [`SolveReport`](crate::structs::SolveReport) and the post-processing
//! checks instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmpcError {
    /// A configuration value is out of range or inconsistent with another.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Start/goal counts differ or the goal set is empty.
    #[error("Dimension mismatch: {starts} start positions vs {goals} goal positions")]
    DimensionMismatch { starts: usize, goals: usize },

    /// A start or goal lies outside the configured workspace.
    #[error("Agent {agent} {which} position {position:?} is outside the workspace")]
    OutsideWorkspace {
        agent: usize,
        which: &'static str,
        position: [f64; 3],
    },

    /// The agent ordering is not a permutation of 0..N.
    #[error("Invalid priority ordering: {0}")]
    InvalidPriority(String),

    #[error("Linear algebra error: {0}")]
    Linalg(String),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Scenario generation failed: {0}")]
    Scenario(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DmpcError>;

impl DmpcError {
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    #[must_use]
    pub const fn dimension_mismatch(starts: usize, goals: usize) -> Self {
        Self::DimensionMismatch { starts, goals }
    }

    #[must_use]
    pub fn linalg(msg: impl Into<String>) -> Self {
        Self::Linalg(msg.into())
    }
}
