pub mod dispatcher;
pub mod docker;
pub mod error;
pub mod job;
pub mod queue;
pub mod sinks;

pub use dispatcher::{Dispatcher, DispatcherSnapshot, QueueSnapshot};
pub use docker::{ContainerRun, DockerRuntime};
pub use error::{AutotestError, Result};
pub use job::{GradingJob, MockGradingJob};
pub use queue::{JobQueue, QueueError};
pub use sinks::{ExecutionObserver, GradeSink, NullObserver, ResultSink, SinkError};
