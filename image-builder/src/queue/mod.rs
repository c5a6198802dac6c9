//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - [`Broker`]: owner of the connection and channel, declares topology
//! - [`Publisher`] / [`Consumer`]: channel-sharing handles implementing
//!   [`MessagePublisher`] and [`MessageConsumer`]
//! - [`MemoryBroker`]: in-process implementation of both traits
//!
//! ## Architecture
//!
//! ```text
//! SubmissionService → Publisher → buildQueue → Consumer → BuildWorker
//! ```

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod types;

use async_trait::async_trait;

pub use broker::Broker;
pub use consumer::Consumer;
pub use error::{ConnectionError, ConsumeError, PublishError, TopologyError};
pub use memory::MemoryBroker;
pub use publisher::{Publisher, PUBLISH_TIMEOUT};
pub use types::{Message, Topology, BUILD_QUEUE, CONTENT_TYPE, STATUS_EXCHANGE};

/// Sends serialized messages to the broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish through the default exchange to the queue named `queue`.
    async fn publish_to_queue(&self, payload: &[u8], queue: &str) -> Result<(), PublishError>;

    /// Publish to `exchange` with `routing_key`.
    async fn publish_to_exchange(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), PublishError>;
}

/// Retrieves messages from the broker, acknowledging them on receipt.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Take one message if one is ready. `Ok(None)` means the queue is empty.
    async fn consume_one(&self, queue: &str) -> Result<Option<Message>, ConsumeError>;

    /// Take every message ready at call time without waiting for new arrivals.
    async fn consume_all(&self, queue: &str) -> Result<Vec<Vec<u8>>, ConsumeError>;
}
