//! Chain construction, publication and execution.

pub mod builder;
pub mod executor;
pub mod pipeline;

pub use builder::ChainBuilder;
pub use executor::{ChainExecutor, Outcome};
pub use pipeline::Pipeline;
