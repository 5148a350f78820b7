//! Switchyard Engine: chain building, execution, suspension and
//! retry-with-failover for interceptor pipelines.

pub mod chain;
pub mod config;
pub mod dispatch;
pub mod failover;
pub mod telemetry;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use chain::{ChainBuilder, ChainExecutor, Outcome, Pipeline};
pub use config::EngineConfig;
pub use dispatch::{Dispatched, Dispatcher, Finished};
pub use failover::{
    Completion, FailoverInvoker, FailoverStrategy, FaultListener, InvocationError,
    RandomStrategy, RetryClassifier, RetryStop, RoundRobinStrategy, SequentialStrategy,
    StaticAlternates, TransportFaultClassifier,
};
pub use telemetry::{init_tracing, LogFormat};

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
