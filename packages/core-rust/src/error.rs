//! Error taxonomy for the pipeline core.
//!
//! Build-time errors are fatal to a chain build, continuation errors are fatal
//! to the current attempt, and failover errors terminate a retry loop. None of
//! them are retried automatically. Domain-level invocation failures are not
//! errors in this sense; they travel as [`Fault`](crate::fault::Fault)s.

use crate::exchange::ExchangeId;

// ---------------------------------------------------------------------------
// Build-time errors
// ---------------------------------------------------------------------------

/// Errors raised while registering phases or building a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("phase `{name}` is already registered")]
    DuplicatePhase { name: String },
    #[error("unknown phase `{name}`")]
    UnknownPhase { name: String },
    #[error("cyclic ordering among interceptors {ids:?} in phase `{phase}`")]
    CyclicOrdering { phase: String, ids: Vec<String> },
}

// ---------------------------------------------------------------------------
// Continuation errors
// ---------------------------------------------------------------------------

/// Misuse or timing errors around suspension and resumption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContinuationError {
    #[error("exchange {exchange} already owns a continuation")]
    DuplicateContinuation { exchange: ExchangeId },
    #[error("continuation for exchange {exchange} expired before it was resumed")]
    ContinuationExpired { exchange: ExchangeId },
    #[error("exchange {exchange} has no suspended chain position to resume")]
    NotSuspended { exchange: ExchangeId },
}

// ---------------------------------------------------------------------------
// Failover errors
// ---------------------------------------------------------------------------

/// Errors raised while choosing a failover target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailoverError {
    #[error("no alternate target available for exchange {exchange} after attempt {attempt}")]
    NoAlternateAvailable { exchange: ExchangeId, attempt: u32 },
}
