//! Suspension and resumption of in-flight invocations.
//!
//! A [`Continuation`] is an explicit state machine
//! (`New -> Pending -> {Resumed | TimedOut}`) plus a `watch` channel that
//! publishes every transition. An interceptor suspends by calling
//! [`Continuation::suspend`] and returning; the executor then parks the chain
//! position inside the continuation and hands control back to its caller. Any
//! thread holding a clone may later call [`Continuation::resume`], after which
//! the executor re-enters the chain at the parked position, possibly on a
//! different worker.
//!
//! Expiry is checked on every access, so a pending continuation whose
//! deadline has passed reads as `TimedOut` without any timer running.
//!
//! Timeout convention for [`Continuation::suspend`]: `0` waits indefinitely,
//! a negative value returns `false` immediately without suspending.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::chain::Chain;
use crate::error::ContinuationError;
use crate::exchange::ExchangeId;

/// Lifecycle state of a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContinuationState {
    New,
    Pending,
    Resumed,
    TimedOut,
}

/// Callback fired with the exchange id when a parked continuation is resumed.
pub type ResumeHook = Arc<dyn Fn(ExchangeId) + Send + Sync>;

// ---------------------------------------------------------------------------
// SavedPosition
// ---------------------------------------------------------------------------

/// Chain and cursor at which a suspended invocation re-enters.
///
/// The chain handle is kept so a resumed invocation finishes on the chain it
/// started on, even if the interceptor set was rebuilt in between.
#[derive(Debug, Clone)]
pub struct SavedPosition {
    chain: Chain,
    cursor: usize,
}

impl SavedPosition {
    #[must_use]
    pub fn new(chain: Chain, cursor: usize) -> Self {
        Self { chain, cursor }
    }

    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Index of the next interceptor to run.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// What the executor should do after an interceptor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No suspension is in effect; continue with the next interceptor.
    Continue,
    /// The position was parked; stop and report the invocation suspended.
    Parked,
    /// The suspension already expired; the attempt cannot continue.
    Expired,
}

// ---------------------------------------------------------------------------
// Continuation
// ---------------------------------------------------------------------------

struct Slot {
    state: ContinuationState,
    deadline: Option<Instant>,
    in_interceptor: bool,
    suspend_requested: bool,
    saved: Option<SavedPosition>,
    context: Option<Box<dyn Any + Send>>,
    hook: Option<ResumeHook>,
}

impl Slot {
    fn expire_if_due(&mut self, now: Instant) -> bool {
        let due = self.state == ContinuationState::Pending
            && self.deadline.is_some_and(|deadline| deadline <= now);
        if due {
            self.state = ContinuationState::TimedOut;
            self.deadline = None;
            self.saved = None;
        }
        due
    }
}

struct Inner {
    exchange: ExchangeId,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<ContinuationState>,
}

/// Shared handle to the suspension state of one exchange.
///
/// Obtain it from [`Exchange::continuation_or_create`](crate::exchange::Exchange::continuation_or_create);
/// clones refer to the same state.
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<Inner>,
}

impl Continuation {
    pub(crate) fn new(exchange: ExchangeId, in_interceptor: bool) -> Self {
        let (state_tx, _state_rx) = watch::channel(ContinuationState::New);
        Self {
            inner: Arc::new(Inner {
                exchange,
                slot: Mutex::new(Slot {
                    state: ContinuationState::New,
                    deadline: None,
                    in_interceptor,
                    suspend_requested: false,
                    saved: None,
                    context: None,
                    hook: None,
                }),
                state_tx,
            }),
        }
    }

    /// Locks the slot, applying any due expiry first.
    fn slot(&self) -> MutexGuard<'_, Slot> {
        let mut slot = self.inner.slot.lock();
        if slot.expire_if_due(Instant::now()) {
            tracing::debug!(exchange = %self.inner.exchange, "continuation timed out");
            self.inner.state_tx.send_replace(ContinuationState::TimedOut);
        }
        slot
    }

    fn publish(&self, state: ContinuationState) {
        self.inner.state_tx.send_replace(state);
    }

    #[must_use]
    pub fn exchange_id(&self) -> ExchangeId {
        self.inner.exchange
    }

    /// Requests suspension of the running invocation.
    ///
    /// Only effective from inside an interceptor currently run by the
    /// executor. Returns `true` if the invocation will park when the
    /// interceptor returns; the eventual outcome can be awaited with
    /// [`Continuation::wait`].
    pub fn suspend(&self, timeout_ms: i64) -> bool {
        let mut slot = self.slot();
        if !slot.in_interceptor {
            tracing::debug!(
                exchange = %self.inner.exchange,
                "suspend ignored outside a running interceptor"
            );
            return false;
        }
        if timeout_ms < 0 {
            return false;
        }
        match slot.state {
            ContinuationState::TimedOut => return false,
            ContinuationState::Pending => {
                slot.suspend_requested = true;
                return true;
            }
            ContinuationState::New | ContinuationState::Resumed => {}
        }

        slot.deadline = u64::try_from(timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));
        slot.state = ContinuationState::Pending;
        slot.suspend_requested = true;
        self.publish(ContinuationState::Pending);
        tracing::debug!(exchange = %self.inner.exchange, timeout_ms, "continuation suspended");
        true
    }

    /// Resumes a pending continuation. A no-op in any other state.
    pub fn resume(&self) {
        let hook = {
            let mut slot = self.slot();
            if slot.state != ContinuationState::Pending {
                tracing::trace!(
                    exchange = %self.inner.exchange,
                    state = ?slot.state,
                    "resume ignored"
                );
                return;
            }
            slot.state = ContinuationState::Resumed;
            slot.deadline = None;
            self.publish(ContinuationState::Resumed);
            if slot.saved.is_some() {
                slot.hook.clone()
            } else {
                None
            }
        };
        tracing::debug!(exchange = %self.inner.exchange, "continuation resumed");
        if let Some(hook) = hook {
            hook(self.inner.exchange);
        }
    }

    /// Forces the continuation back to `New`, discarding any deadline and
    /// parked position.
    pub fn reset(&self) {
        let mut slot = self.slot();
        slot.state = ContinuationState::New;
        slot.deadline = None;
        slot.suspend_requested = false;
        slot.saved = None;
        self.publish(ContinuationState::New);
    }

    /// Cancels a pending suspension: the state becomes `TimedOut` and the
    /// parked position is discarded. A no-op in any other state.
    pub fn cancel(&self) {
        let mut slot = self.slot();
        if slot.state == ContinuationState::Pending {
            slot.state = ContinuationState::TimedOut;
            slot.deadline = None;
            slot.saved = None;
            self.publish(ContinuationState::TimedOut);
            tracing::debug!(exchange = %self.inner.exchange, "continuation cancelled");
        }
    }

    #[must_use]
    pub fn state(&self) -> ContinuationState {
        self.slot().state
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state() == ContinuationState::New
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == ContinuationState::Pending
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.state() == ContinuationState::Resumed
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.state() == ContinuationState::TimedOut
    }

    /// Wall-clock deadline of a pending suspension; `None` when indefinite or
    /// not pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.slot().deadline
    }

    #[must_use]
    pub fn has_saved_position(&self) -> bool {
        self.slot().saved.is_some()
    }

    /// Waits for the outcome of the current suspension: `true` once resumed,
    /// `false` if the deadline elapses first or nothing is suspended.
    pub async fn wait(&self) -> bool {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let deadline = {
                let slot = self.slot();
                match slot.state {
                    ContinuationState::Resumed => return true,
                    ContinuationState::TimedOut | ContinuationState::New => return false,
                    ContinuationState::Pending => slot.deadline,
                }
            };
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return false;
                            }
                        }
                        () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    // -- caller context --

    /// Stores an arbitrary caller-supplied object alongside the suspension.
    pub fn set_context<T: Any + Send>(&self, value: T) {
        self.slot().context = Some(Box::new(value));
    }

    /// Removes and returns the stored context if it has type `T`.
    pub fn take_context<T: Any + Send>(&self) -> Option<T> {
        let mut slot = self.slot();
        let boxed = slot.context.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                slot.context = Some(other);
                None
            }
        }
    }

    // -- dispatcher integration --

    /// Installs the hook fired when a parked position is resumed. Fires
    /// immediately if the continuation was resumed before the hook arrived.
    pub fn set_resume_hook(&self, hook: ResumeHook) {
        let fire = {
            let mut slot = self.slot();
            slot.hook = Some(Arc::clone(&hook));
            slot.state == ContinuationState::Resumed && slot.saved.is_some()
        };
        if fire {
            hook(self.inner.exchange);
        }
    }

    pub fn clear_resume_hook(&self) {
        self.slot().hook = None;
    }

    // -- executor integration --

    /// Marks the start of an interceptor call; suspension is allowed until
    /// the matching [`Continuation::leave_interceptor`].
    pub fn enter_interceptor(&self) {
        let mut slot = self.slot();
        slot.in_interceptor = true;
        slot.suspend_requested = false;
    }

    /// Marks the end of an interceptor call and parks the position produced by
    /// `park` if the interceptor suspended.
    pub fn leave_interceptor(&self, park: impl FnOnce() -> SavedPosition) -> StepOutcome {
        let mut slot = self.slot();
        slot.in_interceptor = false;
        if !std::mem::take(&mut slot.suspend_requested) {
            return StepOutcome::Continue;
        }
        match slot.state {
            ContinuationState::Pending => {
                slot.saved = Some(park());
                StepOutcome::Parked
            }
            ContinuationState::TimedOut => StepOutcome::Expired,
            // Resumed (or reset) before the executor regained control.
            ContinuationState::New | ContinuationState::Resumed => StepOutcome::Continue,
        }
    }

    /// Marks the end of an interceptor call that raised a fault. A suspension
    /// requested during the call is discarded.
    pub fn abort_interceptor(&self) {
        let mut slot = self.slot();
        slot.in_interceptor = false;
        if std::mem::take(&mut slot.suspend_requested)
            && slot.state != ContinuationState::TimedOut
        {
            slot.state = ContinuationState::New;
            slot.deadline = None;
            slot.saved = None;
            self.publish(ContinuationState::New);
        }
    }

    /// Takes the parked position of a resumed continuation.
    ///
    /// Returns `Ok(None)` while the continuation is still pending.
    ///
    /// # Errors
    ///
    /// - [`ContinuationError::ContinuationExpired`] once timed out or cancelled.
    /// - [`ContinuationError::NotSuspended`] if nothing is parked.
    pub fn take_saved(&self) -> Result<Option<SavedPosition>, ContinuationError> {
        let exchange = self.inner.exchange;
        let mut slot = self.slot();
        match slot.state {
            ContinuationState::TimedOut => Err(ContinuationError::ContinuationExpired { exchange }),
            ContinuationState::Pending => Ok(None),
            ContinuationState::Resumed => slot
                .saved
                .take()
                .map(Some)
                .ok_or(ContinuationError::NotSuspended { exchange }),
            ContinuationState::New => Err(ContinuationError::NotSuspended { exchange }),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("exchange", &self.inner.exchange)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn running() -> Continuation {
        Continuation::new(ExchangeId::new(), true)
    }

    fn park(continuation: &Continuation, cursor: usize) -> StepOutcome {
        continuation.leave_interceptor(|| SavedPosition::new(Chain::empty(), cursor))
    }

    #[test]
    fn suspend_outside_interceptor_is_refused() {
        let continuation = Continuation::new(ExchangeId::new(), false);
        assert!(!continuation.suspend(1000));
        assert!(continuation.is_new());
    }

    #[test]
    fn negative_timeout_returns_immediately() {
        let continuation = running();
        assert!(!continuation.suspend(-1));
        assert!(continuation.is_new());
        assert_eq!(park(&continuation, 1), StepOutcome::Continue);
    }

    #[test]
    fn zero_timeout_waits_indefinitely() {
        let continuation = running();
        assert!(continuation.suspend(0));
        assert!(continuation.is_pending());
        assert!(continuation.deadline().is_none());
    }

    #[test]
    fn resume_before_suspend_is_noop() {
        let continuation = running();
        continuation.resume();
        assert!(continuation.is_new());
    }

    #[test]
    fn suspend_park_resume_take() {
        let continuation = running();
        assert!(continuation.suspend(5000));
        assert_eq!(park(&continuation, 2), StepOutcome::Parked);
        assert!(continuation.take_saved().unwrap().is_none());

        continuation.resume();
        assert!(continuation.is_resumed());

        let saved = continuation.take_saved().unwrap().unwrap();
        assert_eq!(saved.cursor(), 2);
        assert!(matches!(
            continuation.take_saved(),
            Err(ContinuationError::NotSuspended { .. })
        ));
    }

    #[test]
    fn resuming_twice_fires_hook_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let continuation = running();
        let counter = Arc::clone(&fired);
        continuation.set_resume_hook(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        continuation.suspend(0);
        park(&continuation, 1);
        continuation.resume();
        continuation.resume();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(continuation.is_resumed());
    }

    #[test]
    fn hook_installed_after_resume_fires_immediately() {
        let fired = Arc::new(AtomicU32::new(0));
        let continuation = running();
        continuation.suspend(0);
        park(&continuation, 1);
        continuation.resume();

        let counter = Arc::clone(&fired);
        continuation.set_resume_hook(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resumed_before_park_continues_inline() {
        let continuation = running();
        continuation.suspend(0);
        continuation.resume();
        assert_eq!(park(&continuation, 3), StepOutcome::Continue);
        assert!(!continuation.has_saved_position());
    }

    #[test]
    fn deadline_elapses_into_timed_out() {
        let continuation = running();
        assert!(continuation.suspend(50));
        park(&continuation, 1);
        std::thread::sleep(Duration::from_millis(70));

        assert!(continuation.is_timed_out());
        continuation.resume();
        assert!(continuation.is_timed_out());
        assert!(matches!(
            continuation.take_saved(),
            Err(ContinuationError::ContinuationExpired { .. })
        ));
    }

    #[test]
    fn cancel_discards_parked_position() {
        let continuation = running();
        continuation.suspend(0);
        park(&continuation, 1);
        continuation.cancel();

        assert!(continuation.is_timed_out());
        assert!(!continuation.has_saved_position());
    }

    #[test]
    fn reset_returns_to_new() {
        let continuation = running();
        continuation.suspend(1000);
        park(&continuation, 1);
        continuation.reset();

        assert!(continuation.is_new());
        assert!(continuation.deadline().is_none());
        assert!(!continuation.has_saved_position());
    }

    #[test]
    fn fault_after_suspend_discards_suspension() {
        let continuation = running();
        continuation.suspend(0);
        continuation.abort_interceptor();
        assert!(continuation.is_new());
        assert!(!continuation.suspend(0));
    }

    #[test]
    fn context_round_trips_by_type() {
        let continuation = running();
        continuation.set_context(String::from("callback-handle"));
        assert!(continuation.take_context::<u32>().is_none());
        assert_eq!(
            continuation.take_context::<String>().as_deref(),
            Some("callback-handle")
        );
        assert!(continuation.take_context::<String>().is_none());
    }

    #[tokio::test]
    async fn wait_observes_resume_from_another_thread() {
        let continuation = running();
        continuation.suspend(0);
        park(&continuation, 1);

        let remote = continuation.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.resume();
        });

        assert!(continuation.wait().await);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn wait_reports_timeout() {
        let continuation = running();
        continuation.suspend(30);
        park(&continuation, 1);

        assert!(!continuation.wait().await);
        assert!(continuation.is_timed_out());
    }
}
