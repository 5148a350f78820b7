//! Failover strategies over a static set of alternates.
//!
//! Provides three implementations of the `FailoverStrategy` trait that differ
//! only in how they pick among the remaining candidates:
//! - `SequentialStrategy`: always the first remaining candidate.
//! - `RandomStrategy`: a uniformly random remaining candidate.
//! - `RoundRobinStrategy`: rotates through candidates across calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use switchyard_core::{EndpointRef, Exchange};

use super::traits::FailoverStrategy;

// ---------------------------------------------------------------------------
// StaticAlternates
// ---------------------------------------------------------------------------

/// Fixed list of alternate endpoints and addresses.
///
/// Candidates already attempted by an exchange, and its current target, are
/// filtered out on every query.
#[derive(Debug, Clone, Default)]
pub struct StaticAlternates {
    endpoints: Vec<EndpointRef>,
    addresses: Vec<String>,
}

impl StaticAlternates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = EndpointRef>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    #[must_use]
    pub fn with_addresses<S: Into<String>>(mut self, addresses: impl IntoIterator<Item = S>) -> Self {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Endpoints not yet attempted by `exchange`.
    #[must_use]
    pub fn remaining_endpoints(&self, exchange: &Exchange) -> Vec<EndpointRef> {
        self.endpoints
            .iter()
            .filter(|candidate| {
                exchange.endpoint() != Some(*candidate)
                    && !exchange.tried_endpoints().contains(candidate)
            })
            .cloned()
            .collect()
    }

    /// Addresses not yet attempted by `exchange`.
    #[must_use]
    pub fn remaining_addresses(&self, exchange: &Exchange) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|candidate| {
                exchange.endpoint().map(|e| &e.address) != Some(*candidate)
                    && !exchange
                        .tried_endpoints()
                        .iter()
                        .any(|tried| &tried.address == *candidate)
            })
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SequentialStrategy
// ---------------------------------------------------------------------------

/// Tries the remaining candidates in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SequentialStrategy {
    alternates: StaticAlternates,
    delay: Option<Duration>,
}

impl SequentialStrategy {
    #[must_use]
    pub fn new(alternates: StaticAlternates) -> Self {
        Self {
            alternates,
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl FailoverStrategy for SequentialStrategy {
    fn alternate_endpoints(&self, exchange: &Exchange) -> Vec<EndpointRef> {
        self.alternates.remaining_endpoints(exchange)
    }

    fn select_alternate_endpoint(&self, alternates: &[EndpointRef]) -> Option<EndpointRef> {
        alternates.first().cloned()
    }

    fn alternate_addresses(&self, exchange: &Exchange) -> Vec<String> {
        self.alternates.remaining_addresses(exchange)
    }

    fn select_alternate_address(&self, addresses: &[String]) -> Option<String> {
        addresses.first().cloned()
    }

    fn retry_delay(&self) -> Option<Duration> {
        self.delay
    }
}

// ---------------------------------------------------------------------------
// RandomStrategy
// ---------------------------------------------------------------------------

/// Picks uniformly among the remaining candidates.
#[derive(Debug, Clone, Default)]
pub struct RandomStrategy {
    alternates: StaticAlternates,
    delay: Option<Duration>,
}

impl RandomStrategy {
    #[must_use]
    pub fn new(alternates: StaticAlternates) -> Self {
        Self {
            alternates,
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

fn pick_random<T: Clone>(candidates: &[T]) -> Option<T> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..candidates.len());
    candidates.get(idx).cloned()
}

impl FailoverStrategy for RandomStrategy {
    fn alternate_endpoints(&self, exchange: &Exchange) -> Vec<EndpointRef> {
        self.alternates.remaining_endpoints(exchange)
    }

    fn select_alternate_endpoint(&self, alternates: &[EndpointRef]) -> Option<EndpointRef> {
        pick_random(alternates)
    }

    fn alternate_addresses(&self, exchange: &Exchange) -> Vec<String> {
        self.alternates.remaining_addresses(exchange)
    }

    fn select_alternate_address(&self, addresses: &[String]) -> Option<String> {
        pick_random(addresses)
    }

    fn retry_delay(&self) -> Option<Duration> {
        self.delay
    }
}

// ---------------------------------------------------------------------------
// RoundRobinStrategy
// ---------------------------------------------------------------------------

/// Rotates through the remaining candidates, spreading retries of different
/// exchanges across targets.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    alternates: StaticAlternates,
    delay: Option<Duration>,
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    #[must_use]
    pub fn new(alternates: StaticAlternates) -> Self {
        Self {
            alternates,
            delay: None,
            next: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn pick<T: Clone>(&self, candidates: &[T]) -> Option<T> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(idx).cloned()
    }
}

impl FailoverStrategy for RoundRobinStrategy {
    fn alternate_endpoints(&self, exchange: &Exchange) -> Vec<EndpointRef> {
        self.alternates.remaining_endpoints(exchange)
    }

    fn select_alternate_endpoint(&self, alternates: &[EndpointRef]) -> Option<EndpointRef> {
        self.pick(alternates)
    }

    fn alternate_addresses(&self, exchange: &Exchange) -> Vec<String> {
        self.alternates.remaining_addresses(exchange)
    }

    fn select_alternate_address(&self, addresses: &[String]) -> Option<String> {
        self.pick(addresses)
    }

    fn retry_delay(&self) -> Option<Duration> {
        self.delay
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
