//! Failure taxonomy for compiler jobs.

use thiserror::Error;

/// Why a job did not produce a usable result.
///
/// Outcomes are cloned into both the waiting caller and the scheduler, so the
/// error carries owned strings only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The compiler process exited, failed to start, or was never launched.
    #[error("compiler unavailable")]
    CompilerUnavailable,
    /// The compiler sent something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The compiler understood the job and reported a failure.
    #[error("compiler error: {0}")]
    Compiler(String),
    /// A newer job with the same identity replaced this one before dispatch.
    #[error("superseded by a newer job")]
    Superseded,
}

/// Result of a single job as seen by its caller.
pub type JobOutcome = std::result::Result<serde_json::Value, JobError>;
