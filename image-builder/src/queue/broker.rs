//! Broker connection manager.
//!
//! Owns the single AMQP connection and channel used by a process and is the
//! only component that declares topology or closes the connection. The
//! [`Publisher`] and [`Consumer`] it hands out hold clones of the channel;
//! `lapin::Channel` is reference counted and safe to use from many tasks at
//! once, so no extra locking is layered on top.

use std::time::Duration;

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{info, warn};

use super::consumer::Consumer;
use super::error::{ConnectionError, TopologyError};
use super::publisher::Publisher;
use super::types::Topology;

/// Connection and channel to RabbitMQ plus the names declared at startup.
pub struct Broker {
    connection: Connection,
    channel: Channel,
    topology: Topology,
}

impl Broker {
    /// Connect, open one channel and declare the build queue and status exchange.
    ///
    /// If anything after the connection fails, the connection is closed
    /// before the error is returned.
    pub async fn connect(url: &str, topology: Topology) -> Result<Self, ConnectionError> {
        info!(url_length = url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(ConnectionError::Connect)?;

        info!("rabbitmq_connected");

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                close_connection(&connection).await;
                return Err(ConnectionError::Channel(e));
            }
        };

        info!("rabbitmq_channel_created");

        let broker = Self {
            connection,
            channel,
            topology,
        };

        let declared = broker.declare_topology().await;
        if let Err(e) = declared {
            broker.close().await;
            return Err(e.into());
        }

        Ok(broker)
    }

    async fn declare_topology(&self) -> Result<(), TopologyError> {
        self.declare_queue(&self.topology.build_queue).await?;
        self.declare_exchange(&self.topology.status_exchange).await?;

        info!(
            build_queue = %self.topology.build_queue,
            status_exchange = %self.topology.status_exchange,
            "rabbitmq_topology_declared"
        );

        Ok(())
    }

    /// Declare `queue` (idempotent) and bind it to `exchange` under `routing_key`.
    pub async fn create_and_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TopologyError> {
        self.declare_queue(queue).await?;

        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| TopologyError::Bind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                source,
            })?;

        info!(
            queue = queue,
            exchange = exchange,
            routing_key = routing_key,
            "rabbitmq_queue_bound"
        );

        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), TopologyError> {
        self.channel
            .queue_declare(queue, queue_options(), FieldTable::default())
            .await
            .map_err(|source| TopologyError::DeclareQueue {
                queue: queue.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<(), TopologyError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                exchange_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| TopologyError::DeclareExchange {
                exchange: exchange.to_string(),
                source,
            })
    }

    /// Publisher sharing this broker's channel.
    pub fn publisher(&self, timeout: Duration) -> Publisher {
        Publisher::new(self.channel.clone(), timeout)
    }

    /// Consumer sharing this broker's channel.
    pub fn consumer(&self, drain_idle: Duration) -> Consumer {
        Consumer::new(self.channel.clone(), drain_idle)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Close the channel and then the connection.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        close_connection(&self.connection).await;

        info!("rabbitmq_broker_closed");
    }
}

async fn close_connection(connection: &Connection) {
    if let Err(e) = connection.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }
}

/// Non-durable, non-exclusive, non-auto-delete.
fn queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: false,
        exclusive: false,
        auto_delete: false,
        nowait: false,
    }
}

fn exchange_options() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        passive: false,
        durable: false,
        auto_delete: false,
        internal: false,
        nowait: false,
    }
}
