//! Parking and resumption of suspended invocations.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{Dispatched, Dispatcher, Finished, ResumeTask};
pub use worker::{BackgroundRunnable, BackgroundWorker, TaskSender};
