use std::time::Instant;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Threat engine unavailable: {0}")]
    Unavailable(String),

    #[error("Threat engine did not answer before the deadline")]
    TimedOut,
}

/// Contract for an external malware engine consulted after the built-in
/// checks. Returned names are reported as `signature:<name>` threats.
///
/// Implementations must give up once `deadline` passes and report
/// [`EngineError::TimedOut`]; the scanner then fails closed.
pub trait ThreatEngine: Send + Sync {
    fn inspect(&self, bytes: &[u8], deadline: Instant) -> Result<Vec<String>, EngineError>;
}
