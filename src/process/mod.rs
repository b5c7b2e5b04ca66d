//! Task supervision: workers, queues, the pipeline, and the executor pool.

pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod worker;

pub use pipeline::Pipeline;
pub use pool::{CommandRecord, ExecutorPool};
pub use queue::{Consumer, Envelope, Received, WorkQueue};
pub use worker::{Action, Lifecycle, QueueLifecycle, Worker, WorkerStatus};
