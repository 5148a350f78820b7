//! Parks suspended invocations and re-enters them once resumed.
//!
//! A suspended exchange is moved into the dispatcher's parked map and its
//! continuation gets a resume hook that queues the exchange id on the
//! resumption worker. The worker hands each resumed exchange to its own task,
//! which re-enters the invoker; the leg may complete, fault (with retries) or
//! suspend again. Expired suspensions are swept on
//! every tick and finalized as failed. Every invocation that leaves the
//! dispatcher is reported once on the `Finished` channel.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use switchyard_core::{Continuation, Exchange, ExchangeId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::worker::{BackgroundRunnable, BackgroundWorker, TaskSender};
use crate::config::EngineConfig;
use crate::failover::invoker::{Completion, FailoverInvoker, InvocationError};

/// An invocation that left the dispatcher, successfully or not.
#[derive(Debug)]
pub struct Finished {
    pub exchange: Exchange,
    pub result: Result<Completion, InvocationError>,
}

/// Immediate result of [`Dispatcher::dispatch`].
#[derive(Debug)]
pub enum Dispatched {
    /// The invocation ended without parking.
    Finished(Finished),
    /// The invocation suspended and is parked; its end arrives on the
    /// finished channel.
    Parked(ExchangeId),
}

/// Work items of the resumption worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeTask {
    /// Re-enter the parked exchange.
    Resume(ExchangeId),
    /// Finalize every parked exchange whose suspension expired.
    Sweep,
}

// ---------------------------------------------------------------------------
// Parking
// ---------------------------------------------------------------------------

struct Parking {
    parked: DashMap<ExchangeId, Exchange>,
    resume_tx: TaskSender<ResumeTask>,
}

impl Parking {
    fn park(&self, exchange: Exchange) -> ExchangeId {
        let id = exchange.id();
        let continuation = exchange.continuation().cloned();
        self.parked.insert(id, exchange);

        // Installed after insertion: the hook may fire immediately.
        if let Some(continuation) = continuation {
            let tx = self.resume_tx.clone();
            continuation.set_resume_hook(Arc::new(move |id| {
                if tx.send(ResumeTask::Resume(id)).is_err() {
                    tracing::debug!(exchange = %id, "resumption worker stopped");
                }
            }));
        }
        tracing::debug!(exchange = %id, "parked suspended invocation");
        id
    }

    fn take(&self, id: ExchangeId) -> Option<Exchange> {
        let (_, exchange) = self.parked.remove(&id)?;
        if let Some(continuation) = exchange.continuation() {
            continuation.clear_resume_hook();
        }
        Some(exchange)
    }

    fn expired(&self) -> Vec<ExchangeId> {
        self.parked
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .continuation()
                    .map_or(true, Continuation::is_timed_out)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    fn ids(&self) -> Vec<ExchangeId> {
        self.parked.iter().map(|entry| *entry.key()).collect()
    }
}

// ---------------------------------------------------------------------------
// ResumptionRunnable
// ---------------------------------------------------------------------------

/// Shared state a resumed leg needs; cloned into each spawned task.
#[derive(Clone)]
struct Resumer {
    invoker: Arc<FailoverInvoker>,
    parking: Arc<Parking>,
    finished_tx: mpsc::UnboundedSender<Finished>,
}

impl Resumer {
    async fn finish(self, mut exchange: Exchange) {
        let result = self.invoker.resume(&mut exchange).await;
        self.settle(exchange, result);
    }

    fn settle(&self, exchange: Exchange, result: Result<Completion, InvocationError>) {
        if matches!(result, Ok(Completion::Suspended)) {
            self.parking.park(exchange);
            return;
        }
        if self.finished_tx.send(Finished { exchange, result }).is_err() {
            tracing::debug!("finished receiver dropped");
        }
    }
}

/// Takes resumed exchanges off the parked map on the worker and runs each
/// resumed leg on its own task, so retry delays and interceptor work of one
/// leg never hold up another.
struct ResumptionRunnable {
    resumer: Resumer,
    in_flight: JoinSet<()>,
}

impl ResumptionRunnable {
    fn spawn_resume(&mut self, id: ExchangeId) {
        while self.in_flight.try_join_next().is_some() {}

        let Some(exchange) = self.resumer.parking.take(id) else {
            tracing::trace!(exchange = %id, "resume for unknown or finished exchange");
            return;
        };
        self.in_flight.spawn(self.resumer.clone().finish(exchange));
    }

    fn sweep(&mut self) {
        for id in self.resumer.parking.expired() {
            tracing::debug!(exchange = %id, "sweeping expired invocation");
            self.spawn_resume(id);
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ResumptionRunnable {
    type Task = ResumeTask;

    async fn run(&mut self, task: ResumeTask) {
        match task {
            ResumeTask::Resume(id) => self.spawn_resume(id),
            ResumeTask::Sweep => self.sweep(),
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        // Legs still running may park again; let them settle first.
        while self.in_flight.join_next().await.is_some() {}

        let parking = Arc::clone(&self.resumer.parking);
        let ids = parking.ids();
        if !ids.is_empty() {
            tracing::info!(parked = ids.len(), "cancelling parked invocations on shutdown");
        }
        for id in ids {
            let Some(exchange) = parking.take(id) else {
                continue;
            };
            if let Some(continuation) = exchange.continuation() {
                continuation.cancel();
            }
            self.resumer.clone().finish(exchange).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Entry point that runs invocations and owns the ones that suspended.
pub struct Dispatcher {
    invoker: Arc<FailoverInvoker>,
    parking: Arc<Parking>,
    worker: BackgroundWorker<ResumptionRunnable>,
}

impl Dispatcher {
    /// Starts the resumption worker. Returns the dispatcher and the channel on
    /// which parked invocations are reported when they end.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        invoker: Arc<FailoverInvoker>,
        config: &EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Finished>) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let parking = Arc::new(Parking {
            parked: DashMap::new(),
            resume_tx: resume_tx.clone(),
        });
        let runnable = ResumptionRunnable {
            resumer: Resumer {
                invoker: Arc::clone(&invoker),
                parking: Arc::clone(&parking),
                finished_tx,
            },
            in_flight: JoinSet::new(),
        };
        let worker =
            BackgroundWorker::start_on(runnable, resume_tx, resume_rx, config.sweep_interval_ms);

        (
            Self {
                invoker,
                parking,
                worker,
            },
            finished_rx,
        )
    }

    /// Runs the exchange's invocation on the caller's task and parks it if
    /// it suspends.
    pub async fn dispatch(&self, mut exchange: Exchange) -> Dispatched {
        let result = self.invoker.invoke(&mut exchange).await;
        if matches!(result, Ok(Completion::Suspended)) {
            Dispatched::Parked(self.parking.park(exchange))
        } else {
            Dispatched::Finished(Finished { exchange, result })
        }
    }

    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parking.parked.len()
    }

    #[must_use]
    pub fn is_parked(&self, id: ExchangeId) -> bool {
        self.parking.parked.contains_key(&id)
    }

    /// Continuation of a parked exchange, for resuming it from elsewhere.
    #[must_use]
    pub fn continuation(&self, id: ExchangeId) -> Option<Continuation> {
        self.parking
            .parked
            .get(&id)
            .and_then(|entry| entry.value().continuation().cloned())
    }

    /// Cancels a parked invocation; it is finalized as expired on the worker.
    /// Returns `false` if the exchange is not parked.
    pub fn cancel(&self, id: ExchangeId) -> bool {
        let Some(continuation) = self.continuation(id) else {
            return false;
        };
        continuation.cancel();
        self.sweep();
        true
    }

    /// Requests an immediate sweep of expired parked invocations.
    pub fn sweep(&self) {
        if let Err(err) = self.worker.submit(ResumeTask::Sweep) {
            tracing::debug!(%err, "sweep not scheduled");
        }
    }

    /// Stops the resumption worker. Invocations still parked are cancelled
    /// and reported as expired.
    pub async fn shutdown(&mut self) {
        self.worker.stop().await;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("parked", &self.parked_count())
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}
