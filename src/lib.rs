//! A Tokio-based runner that executes a batch of fallible futures under a
//! fixed concurrency limit, collects every successful result, and cancels
//! remaining work cooperatively as soon as any unit fails.

mod completion;
mod context;
mod error;
mod limiter;
mod runner;
mod work;

pub use completion::{UnitCompletionInfo, UnitCompletionStatus};
pub use error::{ConfigError, RunnerError};
pub use runner::{RunOutcome, TaskRunner};
pub use work::{work_fn, WorkFuture, WorkUnit};
