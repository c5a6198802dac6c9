//! Image Builder - asynchronous build request pipeline over RabbitMQ.
//!
//! This library provides shared modules for the two binaries:
//! - `image-builder-gateway`: HTTP front door that accepts build requests
//! - `image-generator`: worker that pulls requests and runs the build
//!
//! ## Architecture
//!
//! ```text
//! POST /build → SubmissionService → buildQueue → BuildWorker → BuildRoutine
//! ```

pub mod build;
pub mod config;
pub mod queue;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use build::{BuildId, BuildRequest, SubmissionError, SubmissionService};
pub use config::Config;
pub use queue::{
    Broker, Consumer, MemoryBroker, MessageConsumer, MessagePublisher, Publisher, Topology,
    BUILD_QUEUE, STATUS_EXCHANGE,
};
pub use web::AppState;
pub use worker::{BuildRoutine, BuildWorker, StubBuildRoutine, WorkerSettings};
