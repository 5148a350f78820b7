//! Walks a chain against an exchange.
//!
//! The executor itself is stateless: the chain is immutable and every bit of
//! per-invocation state (cursor, suspension, fault) lives on the exchange and
//! its continuation. One executor value can drive any number of exchanges
//! concurrently.

use switchyard_core::{Chain, ContinuationError, Exchange, Fault, SavedPosition, StepOutcome};

/// Result of one attempt, or one resumed leg of an attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every interceptor ran.
    Completed,
    /// An interceptor suspended; the position is parked in the continuation.
    Suspended,
    /// An interceptor raised a fault and unwinding finished.
    Faulted(Fault),
}

/// Stateless chain driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainExecutor;

impl ChainExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs `chain` from the first interceptor.
    ///
    /// # Errors
    ///
    /// Returns [`ContinuationError::ContinuationExpired`] if an interceptor
    /// suspended with a deadline that elapsed before it returned.
    pub fn run(&self, chain: &Chain, exchange: &mut Exchange) -> Result<Outcome, ContinuationError> {
        self.run_from(chain, exchange, 0)
    }

    /// Runs `chain` starting with the interceptor following `id`. Nothing runs
    /// if `id` is not part of the chain.
    ///
    /// # Errors
    ///
    /// See [`ChainExecutor::run`].
    pub fn run_starting_after(
        &self,
        chain: &Chain,
        exchange: &mut Exchange,
        id: &str,
    ) -> Result<Outcome, ContinuationError> {
        match chain.position(id) {
            Some(position) => self.run_from(chain, exchange, position + 1),
            None => {
                tracing::warn!(interceptor = id, "start interceptor not in chain");
                Ok(Outcome::Completed)
            }
        }
    }

    /// Runs `chain` starting with the interceptor `id` itself. Nothing runs if
    /// `id` is not part of the chain.
    ///
    /// # Errors
    ///
    /// See [`ChainExecutor::run`].
    pub fn run_starting_at(
        &self,
        chain: &Chain,
        exchange: &mut Exchange,
        id: &str,
    ) -> Result<Outcome, ContinuationError> {
        match chain.position(id) {
            Some(position) => self.run_from(chain, exchange, position),
            None => {
                tracing::warn!(interceptor = id, "start interceptor not in chain");
                Ok(Outcome::Completed)
            }
        }
    }

    /// Re-enters a suspended invocation at its parked position.
    ///
    /// Returns [`Outcome::Suspended`] without running anything while the
    /// continuation is still pending.
    ///
    /// # Errors
    ///
    /// - [`ContinuationError::ContinuationExpired`] if the suspension timed
    ///   out or was cancelled.
    /// - [`ContinuationError::NotSuspended`] if nothing is parked.
    pub fn resume(&self, exchange: &mut Exchange) -> Result<Outcome, ContinuationError> {
        let Some(continuation) = exchange.continuation().cloned() else {
            return Err(ContinuationError::NotSuspended {
                exchange: exchange.id(),
            });
        };
        match continuation.take_saved()? {
            None => Ok(Outcome::Suspended),
            Some(saved) => {
                tracing::debug!(
                    exchange = %exchange.id(),
                    cursor = saved.cursor(),
                    "resuming chain"
                );
                self.run_from(saved.chain(), exchange, saved.cursor())
            }
        }
    }

    /// Cancels a suspended invocation. A later resume reports
    /// [`ContinuationError::ContinuationExpired`].
    pub fn cancel(&self, exchange: &Exchange) {
        if let Some(continuation) = exchange.continuation() {
            continuation.cancel();
        }
    }

    fn run_from(
        &self,
        chain: &Chain,
        exchange: &mut Exchange,
        start: usize,
    ) -> Result<Outcome, ContinuationError> {
        for (cursor, entry) in chain.iter().enumerate().skip(start) {
            tracing::trace!(exchange = %exchange.id(), interceptor = entry.id(), cursor, "invoking");
            exchange.enter_interceptor();
            match entry.interceptor().handle_message(exchange) {
                Ok(()) => {
                    let step =
                        exchange.leave_interceptor(|| SavedPosition::new(chain.clone(), cursor + 1));
                    match step {
                        StepOutcome::Continue => {}
                        StepOutcome::Parked => {
                            tracing::debug!(
                                exchange = %exchange.id(),
                                interceptor = entry.id(),
                                "chain suspended"
                            );
                            return Ok(Outcome::Suspended);
                        }
                        StepOutcome::Expired => {
                            return Err(ContinuationError::ContinuationExpired {
                                exchange: exchange.id(),
                            });
                        }
                    }
                }
                Err(fault) => {
                    exchange.abort_interceptor();
                    let fault = fault.with_origin(entry.id());
                    Self::unwind(chain, cursor, exchange, &fault);
                    return Ok(Outcome::Faulted(fault));
                }
            }
        }
        Ok(Outcome::Completed)
    }

    /// Diverts the exchange into fault flow and runs the fault handlers of
    /// the interceptors before `cursor`, last executed first.
    fn unwind(chain: &Chain, cursor: usize, exchange: &mut Exchange, fault: &Fault) {
        tracing::debug!(
            exchange = %exchange.id(),
            origin = fault.origin(),
            %fault,
            "unwinding chain"
        );
        exchange.enter_fault_flow(fault.clone());
        for position in (0..cursor).rev() {
            let Some(entry) = chain.get(position) else {
                continue;
            };
            let interceptor = entry.interceptor();
            if interceptor.handles_faults() {
                interceptor.handle_fault(exchange);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use switchyard_core::{
        ChainEntry, Direction, Interceptor, InterceptorDescriptor, Message, Phase,
    };

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    enum Behaviour {
        Pass,
        Suspend(i64),
        /// Suspends, then keeps running past the deadline before returning.
        SuspendAndStall(i64, Duration),
        Fault,
        SuspendThenFault,
    }

    struct Scripted {
        descriptor: InterceptorDescriptor,
        behaviour: Behaviour,
        log: Log,
    }

    impl Interceptor for Scripted {
        fn descriptor(&self) -> &InterceptorDescriptor {
            &self.descriptor
        }

        fn handle_message(&self, exchange: &mut Exchange) -> Result<(), Fault> {
            self.log.lock().push(format!("msg:{}", self.id()));
            match self.behaviour {
                Behaviour::Pass => Ok(()),
                Behaviour::Suspend(timeout) => {
                    exchange.continuation_or_create().suspend(timeout);
                    Ok(())
                }
                Behaviour::SuspendAndStall(timeout, stall) => {
                    exchange.continuation_or_create().suspend(timeout);
                    std::thread::sleep(stall);
                    Ok(())
                }
                Behaviour::Fault => Err(Fault::server(format!("{} failed", self.id()))),
                Behaviour::SuspendThenFault => {
                    exchange.continuation_or_create().suspend(0);
                    Err(Fault::transport("gone"))
                }
            }
        }

        fn handles_faults(&self) -> bool {
            true
        }

        fn handle_fault(&self, _exchange: &mut Exchange) {
            self.log.lock().push(format!("fault:{}", self.id()));
        }
    }

    fn chain(log: &Log, script: Vec<(&str, Behaviour)>) -> Chain {
        Chain::new(
            script
                .into_iter()
                .map(|(id, behaviour)| {
                    ChainEntry::new(
                        Phase::new("invoke", 0),
                        Arc::new(Scripted {
                            descriptor: InterceptorDescriptor::new(id, "invoke"),
                            behaviour,
                            log: Arc::clone(log),
                        }) as Arc<dyn Interceptor>,
                    )
                })
                .collect(),
        )
    }

    fn exchange() -> Exchange {
        Exchange::inbound(Message::with_content(Direction::In, "request"))
    }

    #[test]
    fn runs_every_interceptor_in_order() {
        let log = Log::default();
        let chain = chain(&log, vec![("a", Behaviour::Pass), ("b", Behaviour::Pass)]);
        let outcome = ChainExecutor::new().run(&chain, &mut exchange()).unwrap();

        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b"]);
    }

    #[test]
    fn fault_unwinds_executed_interceptors_in_reverse() {
        let log = Log::default();
        let chain = chain(
            &log,
            vec![
                ("a", Behaviour::Pass),
                ("b", Behaviour::Pass),
                ("c", Behaviour::Fault),
                ("d", Behaviour::Pass),
            ],
        );
        let mut exchange = exchange();
        let outcome = ChainExecutor::new().run(&chain, &mut exchange).unwrap();

        let Outcome::Faulted(fault) = outcome else {
            panic!("expected a fault");
        };
        assert_eq!(fault.origin(), Some("c"));
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b", "msg:c", "fault:b", "fault:a"]);
        assert!(exchange.is_in_fault_flow());
        assert_eq!(exchange.message().map(Message::direction), Some(Direction::Fault));
    }

    #[test]
    fn suspend_parks_after_the_suspending_interceptor() {
        let log = Log::default();
        let chain = chain(
            &log,
            vec![("a", Behaviour::Pass), ("b", Behaviour::Suspend(0)), ("c", Behaviour::Pass)],
        );
        let executor = ChainExecutor::new();
        let mut exchange = exchange();

        assert!(matches!(executor.run(&chain, &mut exchange).unwrap(), Outcome::Suspended));
        assert!(matches!(executor.resume(&mut exchange).unwrap(), Outcome::Suspended));
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b"]);

        exchange.continuation().unwrap().resume();
        assert!(matches!(executor.resume(&mut exchange).unwrap(), Outcome::Completed));
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b", "msg:c"]);

        assert!(matches!(
            executor.resume(&mut exchange),
            Err(ContinuationError::NotSuspended { .. })
        ));
    }

    #[test]
    fn resume_without_continuation_is_not_suspended() {
        assert!(matches!(
            ChainExecutor::new().resume(&mut exchange()),
            Err(ContinuationError::NotSuspended { .. })
        ));
    }

    #[test]
    fn cancelled_suspension_cannot_resume() {
        let log = Log::default();
        let chain = chain(&log, vec![("a", Behaviour::Suspend(0)), ("b", Behaviour::Pass)]);
        let executor = ChainExecutor::new();
        let mut exchange = exchange();

        executor.run(&chain, &mut exchange).unwrap();
        executor.cancel(&exchange);
        exchange.continuation().unwrap().resume();

        assert!(matches!(
            executor.resume(&mut exchange),
            Err(ContinuationError::ContinuationExpired { .. })
        ));
        assert_eq!(*log.lock(), vec!["msg:a"]);
    }

    #[test]
    fn deadline_elapsed_before_return_is_expired() {
        let log = Log::default();
        let chain = chain(
            &log,
            vec![
                ("a", Behaviour::SuspendAndStall(1, Duration::from_millis(10))),
                ("b", Behaviour::Pass),
            ],
        );
        let mut exchange = exchange();

        assert!(matches!(
            ChainExecutor::new().run(&chain, &mut exchange),
            Err(ContinuationError::ContinuationExpired { .. })
        ));
        assert_eq!(*log.lock(), vec!["msg:a"]);
        assert!(exchange.continuation().unwrap().is_timed_out());
        assert!(!exchange.continuation().unwrap().has_saved_position());
    }

    #[test]
    fn fault_after_suspend_wins() {
        let log = Log::default();
        let chain = chain(
            &log,
            vec![("a", Behaviour::Pass), ("b", Behaviour::SuspendThenFault)],
        );
        let mut exchange = exchange();
        let outcome = ChainExecutor::new().run(&chain, &mut exchange).unwrap();

        assert!(matches!(outcome, Outcome::Faulted(_)));
        assert!(exchange.continuation().unwrap().is_new());
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b", "fault:a"]);
    }

    #[test]
    fn negative_timeout_does_not_suspend() {
        let log = Log::default();
        let chain = chain(&log, vec![("a", Behaviour::Suspend(-1)), ("b", Behaviour::Pass)]);
        let outcome = ChainExecutor::new().run(&chain, &mut exchange()).unwrap();

        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(*log.lock(), vec!["msg:a", "msg:b"]);
    }

    #[test]
    fn starting_after_and_at() {
        let log = Log::default();
        let chain = chain(
            &log,
            vec![("a", Behaviour::Pass), ("b", Behaviour::Pass), ("c", Behaviour::Pass)],
        );
        let executor = ChainExecutor::new();

        executor.run_starting_after(&chain, &mut exchange(), "a").unwrap();
        assert_eq!(*log.lock(), vec!["msg:b", "msg:c"]);

        log.lock().clear();
        executor.run_starting_at(&chain, &mut exchange(), "c").unwrap();
        assert_eq!(*log.lock(), vec!["msg:c"]);

        log.lock().clear();
        executor.run_starting_after(&chain, &mut exchange(), "zzz").unwrap();
        assert!(log.lock().is_empty());
    }
}
