//! Domain-level invocation failures.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Broad classification of a fault, used by retry classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    /// The transport could not deliver or receive the message.
    Transport,
    /// The target answered but reported itself unavailable.
    ServiceUnavailable,
    /// The target did not answer in time.
    Timeout,
    /// The request itself was rejected as invalid.
    Client,
    /// The target failed while processing the request.
    Server,
}

impl FaultKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::ServiceUnavailable => "service-unavailable",
            Self::Timeout => "timeout",
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// A failure raised by an interceptor and propagated through fault flow.
///
/// Cloning is cheap; an optional opaque cause is shared.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} fault: {reason}")]
pub struct Fault {
    kind: FaultKind,
    reason: String,
    origin: Option<String>,
    cause: Option<Arc<anyhow::Error>>,
}

impl Fault {
    #[must_use]
    pub fn new(kind: FaultKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            origin: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::new(FaultKind::Transport, reason)
    }

    #[must_use]
    pub fn service_unavailable(reason: impl Into<String>) -> Self {
        Self::new(FaultKind::ServiceUnavailable, reason)
    }

    #[must_use]
    pub fn client(reason: impl Into<String>) -> Self {
        Self::new(FaultKind::Client, reason)
    }

    #[must_use]
    pub fn server(reason: impl Into<String>) -> Self {
        Self::new(FaultKind::Server, reason)
    }

    /// Attaches an opaque underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Records the id of the interceptor that raised the fault, unless one is
    /// already recorded.
    #[must_use]
    pub fn with_origin(mut self, interceptor_id: &str) -> Self {
        if self.origin.is_none() {
            self.origin = Some(interceptor_id.to_string());
        }
        self
    }

    #[must_use]
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Id of the interceptor that raised the fault, if known.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_reason() {
        let fault = Fault::transport("connection refused");
        assert_eq!(fault.to_string(), "transport fault: connection refused");
    }

    #[test]
    fn first_origin_wins() {
        let fault = Fault::server("boom").with_origin("invoker").with_origin("other");
        assert_eq!(fault.origin(), Some("invoker"));
    }

    #[test]
    fn cause_survives_clone() {
        let fault = Fault::transport("reset").with_cause(anyhow::anyhow!("socket closed"));
        let copy = fault.clone();
        assert_eq!(copy.cause().map(ToString::to_string).as_deref(), Some("socket closed"));
    }
}
