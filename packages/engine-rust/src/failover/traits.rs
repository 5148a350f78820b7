//! Failover contracts.
//!
//! Defines the three pluggable seams of the retry loop: `FailoverStrategy`,
//! `RetryClassifier` and `FaultListener`. Closures implement the latter two.

use std::time::Duration;

use switchyard_core::{EndpointRef, Exchange, Fault, Message};

// ---------------------------------------------------------------------------
// FailoverStrategy
// ---------------------------------------------------------------------------

/// Supplies and selects alternate targets for a retried invocation.
///
/// Alternates are re-queried on every retry, so implementations may consult
/// [`Exchange::tried_endpoints`] to avoid targets that already failed.
pub trait FailoverStrategy: Send + Sync {
    /// Alternate endpoints for the exchange's next attempt.
    fn alternate_endpoints(&self, exchange: &Exchange) -> Vec<EndpointRef>;

    /// Picks one endpoint out of a non-empty list.
    fn select_alternate_endpoint(&self, alternates: &[EndpointRef]) -> Option<EndpointRef>;

    /// Alternate addresses for the current endpoint. Consulted before
    /// endpoints; an empty list falls through to endpoints.
    fn alternate_addresses(&self, exchange: &Exchange) -> Vec<String>;

    /// Picks one address out of a non-empty list.
    fn select_alternate_address(&self, addresses: &[String]) -> Option<String>;

    /// Pause before the next attempt.
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

// ---------------------------------------------------------------------------
// RetryClassifier
// ---------------------------------------------------------------------------

/// Decides whether a fault is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, fault: &Fault) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&Fault) -> bool + Send + Sync,
{
    fn is_retryable(&self, fault: &Fault) -> bool {
        self(fault)
    }
}

// ---------------------------------------------------------------------------
// FaultListener
// ---------------------------------------------------------------------------

/// Observes every fault the invoker could not recover from.
///
/// Called exactly once per unrecovered fault with a human-readable
/// description and the fault message. Returning `false` suppresses the
/// default fault log event.
pub trait FaultListener: Send + Sync {
    fn on_fault(&self, fault: &Fault, description: &str, message: Option<&Message>) -> bool;
}

impl<F> FaultListener for F
where
    F: Fn(&Fault, &str, Option<&Message>) -> bool + Send + Sync,
{
    fn on_fault(&self, fault: &Fault, description: &str, message: Option<&Message>) -> bool {
        self(fault, description, message)
    }
}
