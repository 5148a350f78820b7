//! Switchyard Core: phases, interceptors, chains, exchanges, faults and
//! continuations for an interceptor-driven RPC pipeline.

pub mod chain;
pub mod continuation;
pub mod error;
pub mod exchange;
pub mod fault;
pub mod interceptor;
pub mod message;
pub mod phase;

pub use chain::{Chain, ChainEntry};
pub use continuation::{Continuation, ContinuationState, ResumeHook, SavedPosition, StepOutcome};
pub use error::{BuildError, ContinuationError, FailoverError};
pub use exchange::{EndpointRef, Exchange, ExchangeId};
pub use fault::{Fault, FaultKind};
pub use interceptor::{Interceptor, InterceptorDescriptor};
pub use message::{Direction, Message, Properties};
pub use phase::{Phase, PhaseRegistry, PhaseSnapshot};
