//! The interceptor contract.

use std::collections::BTreeSet;

use crate::exchange::Exchange;
use crate::fault::Fault;

// ---------------------------------------------------------------------------
// InterceptorDescriptor
// ---------------------------------------------------------------------------

/// Identity, phase and intra-phase ordering constraints of an interceptor.
///
/// `before`/`after` only order interceptors sharing a phase; ordering across
/// phases follows the phase ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorDescriptor {
    id: String,
    phase: String,
    before: BTreeSet<String>,
    after: BTreeSet<String>,
}

impl InterceptorDescriptor {
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
        }
    }

    /// Requires this interceptor to run before `id`.
    #[must_use]
    pub fn runs_before(mut self, id: impl Into<String>) -> Self {
        self.before.insert(id.into());
        self
    }

    /// Requires this interceptor to run after `id`.
    #[must_use]
    pub fn runs_after(mut self, id: impl Into<String>) -> Self {
        self.after.insert(id.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }

    #[must_use]
    pub fn before(&self) -> &BTreeSet<String> {
        &self.before
    }

    #[must_use]
    pub fn after(&self) -> &BTreeSet<String> {
        &self.after
    }
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

/// A unit of message processing placed in a phase.
///
/// Implementations must be stateless with respect to any single invocation:
/// one instance serves every exchange running through a chain concurrently,
/// so per-invocation state belongs on the [`Exchange`] or its messages.
///
/// Fault handling is an optional capability. An interceptor that returns
/// `true` from [`handles_faults`](Interceptor::handles_faults) gets
/// [`handle_fault`](Interceptor::handle_fault) called when a later
/// interceptor in the same chain raises a fault.
pub trait Interceptor: Send + Sync {
    fn descriptor(&self) -> &InterceptorDescriptor;

    /// Processes the exchange's active message.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] to divert the exchange into fault flow.
    fn handle_message(&self, exchange: &mut Exchange) -> Result<(), Fault>;

    fn handles_faults(&self) -> bool {
        false
    }

    /// Unwinds this interceptor's work after a later interceptor faulted.
    fn handle_fault(&self, _exchange: &mut Exchange) {}

    fn id(&self) -> &str {
        self.descriptor().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_collects_constraints() {
        let descriptor = InterceptorDescriptor::new("logging", "receive")
            .runs_before("auth")
            .runs_before("decode")
            .runs_after("metrics");

        assert_eq!(descriptor.id(), "logging");
        assert_eq!(descriptor.phase(), "receive");
        assert_eq!(descriptor.before().len(), 2);
        assert!(descriptor.after().contains("metrics"));
    }
}
