//! Retry with failover: strategies, classification and the retry invoker.

pub mod classify;
pub mod invoker;
pub mod strategy;
pub mod traits;

pub use classify::TransportFaultClassifier;
pub use invoker::{Completion, FailoverInvoker, InvocationError, RetryStop};
pub use strategy::{RandomStrategy, RoundRobinStrategy, SequentialStrategy, StaticAlternates};
pub use traits::{FailoverStrategy, FaultListener, RetryClassifier};
