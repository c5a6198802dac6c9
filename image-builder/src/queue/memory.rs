//! In-process broker with AMQP-like routing.
//!
//! Publishing with an empty exchange name routes to the queue of the same
//! name, direct exchanges route by exact binding key, and anything that
//! matches no queue is dropped, as RabbitMQ does for non-mandatory
//! publishes. Binding to or publishing on an undeclared exchange fails, as
//! RabbitMQ answers NOT_FOUND. After [`MemoryBroker::close`] every operation
//! fails.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::error::{ConsumeError, PublishError, TopologyError};
use super::types::{Message, Topology};
use super::{MessageConsumer, MessagePublisher};

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    // exchange -> (routing key, queue)
    bindings: HashMap<String, Vec<(String, String)>>,
    next_tag: u64,
    closed: bool,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker with the build queue and status exchange already declared.
    pub fn with_topology(topology: &Topology) -> Self {
        let broker = Self::new();
        broker.declare_queue(&topology.build_queue);
        broker.declare_exchange(&topology.status_exchange);
        broker
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave State half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare a queue. Redeclaring keeps its contents.
    pub fn declare_queue(&self, queue: &str) {
        self.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Declare a direct exchange. Redeclaring keeps its bindings.
    pub fn declare_exchange(&self, exchange: &str) {
        self.lock().bindings.entry(exchange.to_string()).or_default();
    }

    /// Declare `queue` and bind it to the declared `exchange` under `routing_key`.
    pub fn create_and_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TopologyError> {
        let mut state = self.lock();
        if !state.bindings.contains_key(exchange) {
            return Err(TopologyError::ExchangeNotFound(exchange.to_string()));
        }

        state.queues.entry(queue.to_string()).or_default();
        let binding = (routing_key.to_string(), queue.to_string());
        if let Some(bindings) = state.bindings.get_mut(exchange) {
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
        Ok(())
    }

    /// Number of messages waiting on `queue`, or `None` if it was never declared.
    pub fn queue_len(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(VecDeque::len)
    }

    /// Copies of the bodies waiting on `queue`, oldest first.
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every later operation fail, as if the connection dropped.
    pub fn close(&self) {
        self.lock().closed = true;
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish_to_queue(&self, payload: &[u8], queue: &str) -> Result<(), PublishError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PublishError::Unavailable("memory broker closed".to_string()));
        }
        if let Some(q) = state.queues.get_mut(queue) {
            q.push_back(payload.to_vec());
        }
        Ok(())
    }

    async fn publish_to_exchange(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), PublishError> {
        if exchange.is_empty() {
            return self.publish_to_queue(payload, routing_key).await;
        }

        let mut state = self.lock();
        if state.closed {
            return Err(PublishError::Unavailable("memory broker closed".to_string()));
        }

        let targets: Vec<String> = state
            .bindings
            .get(exchange)
            .ok_or_else(|| PublishError::ExchangeNotFound(exchange.to_string()))?
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, queue)| queue.clone())
            .collect();

        for target in targets {
            if let Some(q) = state.queues.get_mut(&target) {
                q.push_back(payload.to_vec());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for MemoryBroker {
    async fn consume_one(&self, queue: &str) -> Result<Option<Message>, ConsumeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ConsumeError::Unavailable("memory broker closed".to_string()));
        }

        let body = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| ConsumeError::QueueNotFound(queue.to_string()))?
            .pop_front();

        Ok(body.map(|body| {
            state.next_tag += 1;
            Message::new(body, state.next_tag)
        }))
    }

    async fn consume_all(&self, queue: &str) -> Result<Vec<Vec<u8>>, ConsumeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ConsumeError::Unavailable("memory broker closed".to_string()));
        }

        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| ConsumeError::QueueNotFound(queue.to_string()))?;
        let batch: Vec<Vec<u8>> = q.drain(..).collect();
        state.next_tag += batch.len() as u64;
        Ok(batch)
    }
}
