//! The retry-with-failover loop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use switchyard_core::{ContinuationError, EndpointRef, Exchange, FailoverError, Fault};
use tracing::{info_span, Instrument};

use super::classify::TransportFaultClassifier;
use super::strategy::{SequentialStrategy, StaticAlternates};
use super::traits::{FailoverStrategy, FaultListener, RetryClassifier};
use crate::chain::executor::{ChainExecutor, Outcome};
use crate::chain::pipeline::Pipeline;
use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Successful end of an `invoke` or `resume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The chain ran to the end.
    Completed,
    /// An interceptor suspended; resume once the continuation is resumed.
    Suspended,
}

/// Why the retry loop stopped on a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    NotRetryable,
    AttemptsExhausted,
    NoAlternateAvailable,
}

impl RetryStop {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRetryable => "not retryable",
            Self::AttemptsExhausted => "attempts exhausted",
            Self::NoAlternateAvailable => "no alternate available",
        }
    }
}

impl fmt::Display for RetryStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The last attempt faulted and no further attempt was made.
    #[error("invocation failed after {attempts} attempt(s), {stop}: {fault}")]
    Fault {
        fault: Fault,
        attempts: u32,
        stop: RetryStop,
        /// Whether the default fault log event was emitted.
        logged: bool,
    },
    #[error(transparent)]
    Continuation(#[from] ContinuationError),
}

impl InvocationError {
    /// The final fault, if the invocation ended in one.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault { fault, .. } => Some(fault),
            Self::Continuation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FailoverInvoker
// ---------------------------------------------------------------------------

/// Drives exchanges through a pipeline's chain and retries retryable faults
/// against alternate targets.
///
/// Every attempt after the first re-queries the strategy, builds a fresh
/// outbound message and re-runs the current chain from the start. On a final
/// fault the exchange is pointed back at its original endpoint and the fault
/// listener is consulted exactly once.
pub struct FailoverInvoker {
    pipeline: Arc<Pipeline>,
    executor: ChainExecutor,
    strategy: Arc<dyn FailoverStrategy>,
    classifier: Arc<dyn RetryClassifier>,
    listener: Option<Arc<dyn FaultListener>>,
    max_attempts: u32,
    retry_delay: Option<Duration>,
}

impl FailoverInvoker {
    /// Creates an invoker with a sequential strategy over no alternates and
    /// the transport fault classifier.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, config: &EngineConfig) -> Self {
        Self {
            pipeline,
            executor: ChainExecutor::new(),
            strategy: Arc::new(SequentialStrategy::new(StaticAlternates::new())),
            classifier: Arc::new(TransportFaultClassifier),
            listener: None,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn FailoverStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_fault_listener(mut self, listener: Arc<dyn FaultListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs the exchange's first attempt and any retries.
    ///
    /// # Errors
    ///
    /// - [`InvocationError::Fault`] when the last attempt faulted.
    /// - [`InvocationError::Continuation`] when a suspension expired.
    pub async fn invoke(&self, exchange: &mut Exchange) -> Result<Completion, InvocationError> {
        let chain = self.pipeline.chain();
        let first = self.executor.run(&chain, exchange);
        self.drive(exchange, first).await
    }

    /// Continues a suspended exchange, retrying if the resumed leg faults.
    ///
    /// # Errors
    ///
    /// See [`FailoverInvoker::invoke`]; additionally
    /// [`ContinuationError::NotSuspended`] if nothing is parked.
    pub async fn resume(&self, exchange: &mut Exchange) -> Result<Completion, InvocationError> {
        let resumed = self.executor.resume(exchange);
        self.drive(exchange, resumed).await
    }

    async fn drive(
        &self,
        exchange: &mut Exchange,
        first: Result<Outcome, ContinuationError>,
    ) -> Result<Completion, InvocationError> {
        let span = info_span!(
            "invocation",
            exchange = %exchange.id(),
            attempts = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = self.retry_loop(exchange, first).await;

            let outcome = match &result {
                Ok(Completion::Completed) => "completed",
                Ok(Completion::Suspended) => "suspended",
                Err(InvocationError::Fault { .. }) => "faulted",
                Err(InvocationError::Continuation(_)) => "continuation_error",
            };
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let span = tracing::Span::current();
            span.record("attempts", exchange.attempt());
            span.record("duration_ms", duration_ms);
            span.record("outcome", outcome);

            tracing::debug!(
                attempts = exchange.attempt(),
                duration_ms,
                outcome,
                "invocation leg complete"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn retry_loop(
        &self,
        exchange: &mut Exchange,
        first: Result<Outcome, ContinuationError>,
    ) -> Result<Completion, InvocationError> {
        let mut outcome = first;
        loop {
            let fault = match outcome {
                Ok(Outcome::Completed) => return Ok(Completion::Completed),
                Ok(Outcome::Suspended) => return Ok(Completion::Suspended),
                Ok(Outcome::Faulted(fault)) => fault,
                Err(err) => {
                    exchange.restore_original_endpoint();
                    return Err(err.into());
                }
            };

            let target = match self.next_target(exchange, &fault) {
                Ok(target) => target,
                Err(stop) => return Err(self.finalize(exchange, fault, stop)),
            };

            if let Some(delay) = self.retry_delay.or_else(|| self.strategy.retry_delay()) {
                tokio::time::sleep(delay).await;
            }

            tracing::info!(
                attempt = exchange.attempt() + 1,
                target = %target,
                %fault,
                "retrying invocation"
            );
            exchange.begin_retry(target);
            let chain = self.pipeline.chain();
            outcome = self.executor.run(&chain, exchange);
        }
    }

    fn next_target(&self, exchange: &Exchange, fault: &Fault) -> Result<EndpointRef, RetryStop> {
        if !self.classifier.is_retryable(fault) {
            return Err(RetryStop::NotRetryable);
        }
        if exchange.attempt() >= self.max_attempts {
            return Err(RetryStop::AttemptsExhausted);
        }
        self.select_target(exchange).map_err(|err| {
            tracing::debug!(%err, "failover target selection failed");
            RetryStop::NoAlternateAvailable
        })
    }

    /// Asks the strategy for the next target: addresses first, endpoints
    /// otherwise. Selection is called at most once.
    ///
    /// # Errors
    ///
    /// Returns [`FailoverError::NoAlternateAvailable`] if there is nothing
    /// to choose from or the strategy declines to choose.
    pub fn select_target(&self, exchange: &Exchange) -> Result<EndpointRef, FailoverError> {
        let none = || FailoverError::NoAlternateAvailable {
            exchange: exchange.id(),
            attempt: exchange.attempt(),
        };

        let addresses = self.strategy.alternate_addresses(exchange);
        if !addresses.is_empty() {
            let address = self
                .strategy
                .select_alternate_address(&addresses)
                .ok_or_else(none)?;
            let name = exchange
                .endpoint()
                .map_or_else(String::new, |current| current.name.clone());
            return Ok(EndpointRef::new(name, address));
        }

        let endpoints = self.strategy.alternate_endpoints(exchange);
        if endpoints.is_empty() {
            return Err(none());
        }
        self.strategy
            .select_alternate_endpoint(&endpoints)
            .ok_or_else(none)
    }

    fn finalize(&self, exchange: &mut Exchange, fault: Fault, stop: RetryStop) -> InvocationError {
        exchange.restore_original_endpoint();
        let attempts = exchange.attempt();
        let description = format!("invocation failed after {attempts} attempt(s), {stop}");

        let logged = self.listener.as_ref().map_or(true, |listener| {
            listener.on_fault(&fault, &description, exchange.fault_message())
        });
        if logged {
            tracing::warn!(
                exchange = %exchange.id(),
                attempts,
                stop = stop.as_str(),
                origin = fault.origin(),
                %fault,
                "{description}"
            );
        }

        InvocationError::Fault {
            fault,
            attempts,
            stop,
            logged,
        }
    }
}

impl fmt::Debug for FailoverInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverInvoker")
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
