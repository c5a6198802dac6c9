//! Error types for broker operations.

use std::time::Duration;

use thiserror::Error;

/// Failure to bring up the broker connection manager. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to RabbitMQ: {0}")]
    Connect(#[source] lapin::Error),

    #[error("failed to open a channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Failure while declaring queues, exchanges or bindings.
///
/// Redeclaring an entity with conflicting parameters is rejected by the
/// broker (PRECONDITION_FAILED) and lands here as well.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("error declaring queue {queue}: {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("error declaring exchange {exchange}: {source}")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("error binding queue {queue} to exchange {exchange}: {source}")]
    Bind {
        queue: String,
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("exchange {0} not found")]
    ExchangeNotFound(String),
}

/// Failure to hand a message to the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("failed to publish a message: {0}")]
    Transport(#[source] lapin::Error),

    #[error("exchange {0} not found")]
    ExchangeNotFound(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Failure while pulling messages from a queue.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("failed to consume from {queue}: {source}")]
    Transport {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("queue {0} not found")]
    QueueNotFound(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}
