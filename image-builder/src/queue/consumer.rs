//! Pull-style consumption from RabbitMQ queues.
//!
//! Both operations auto-acknowledge: a message handed to the caller is gone
//! from the broker whether or not the caller manages to process it.

use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use rand::{distributions::Alphanumeric, Rng};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::ConsumeError;
use super::types::Message;
use super::MessageConsumer;

/// Consumer backed by the broker's shared channel.
#[derive(Clone)]
pub struct Consumer {
    channel: Channel,
    drain_idle: Duration,
}

impl Consumer {
    pub(crate) fn new(channel: Channel, drain_idle: Duration) -> Self {
        Self {
            channel,
            drain_idle,
        }
    }

    /// Number of messages ready on `queue` right now.
    async fn ready_count(&self, queue: &str) -> Result<u32, ConsumeError> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| transport(queue, source))?;

        Ok(declared.message_count())
    }
}

#[async_trait]
impl MessageConsumer for Consumer {
    async fn consume_one(&self, queue: &str) -> Result<Option<Message>, ConsumeError> {
        let fetched = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .map_err(|source| transport(queue, source))?;

        Ok(fetched.map(|got| {
            let delivery = got.delivery;
            Message {
                content_type: delivery
                    .properties
                    .content_type()
                    .as_ref()
                    .map(|s| s.to_string()),
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
            }
        }))
    }

    async fn consume_all(&self, queue: &str) -> Result<Vec<Vec<u8>>, ConsumeError> {
        let ready = self.ready_count(queue).await? as usize;
        if ready == 0 {
            return Ok(Vec::new());
        }

        let tag = consumer_tag();
        let subscription = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| transport(queue, source))?;

        debug!(queue = queue, consumer_tag = %tag, ready = ready, "rabbitmq_drain_started");

        let mut bodies = subscription.map(|delivery| delivery.map(|d| d.data));
        let mut batch = drain_until_idle(&mut bodies, ready, self.drain_idle)
            .await
            .map_err(|source| transport(queue, source))?;

        self.channel
            .basic_cancel(&tag, BasicCancelOptions::default())
            .await
            .map_err(|source| transport(queue, source))?;

        // Anything pushed before the cancel landed is already acknowledged.
        if let Some(e) = drain_buffered(&mut bodies, &mut batch) {
            warn!(queue = queue, error = %e, "rabbitmq_drain_tail_error");
        }

        info!(queue = queue, count = batch.len(), "rabbitmq_queue_drained");

        Ok(batch)
    }
}

/// Collect up to `ready` bodies, stopping early once `idle` passes without
/// one or the stream ends. The first stream error aborts the drain.
async fn drain_until_idle<S, E>(
    stream: &mut S,
    ready: usize,
    idle: Duration,
) -> Result<Vec<Vec<u8>>, E>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
{
    let mut batch = Vec::with_capacity(ready);
    while batch.len() < ready {
        match timeout(idle, stream.next()).await {
            Ok(Some(Ok(body))) => batch.push(body),
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) | Err(_) => break,
        }
    }
    Ok(batch)
}

/// Append every body the stream can yield without waiting. Returns the error
/// that stopped it, if any.
fn drain_buffered<S, E>(stream: &mut S, batch: &mut Vec<Vec<u8>>) -> Option<E>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
{
    loop {
        match stream.next().now_or_never() {
            Some(Some(Ok(body))) => batch.push(body),
            Some(Some(Err(e))) => return Some(e),
            Some(None) | None => return None,
        }
    }
}

fn transport(queue: &str, source: lapin::Error) -> ConsumeError {
    ConsumeError::Transport {
        queue: queue.to_string(),
        source,
    }
}

fn consumer_tag() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("image-builder-drain-{}", suffix)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn bodies(items: &[&str]) -> Vec<Result<Vec<u8>, &'static str>> {
        items.iter().map(|s| Ok(s.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn test_drain_stops_at_ready_count() {
        let mut deliveries = stream::iter(bodies(&["a", "b", "c"]));

        let batch = drain_until_idle(&mut deliveries, 2, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(batch, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(deliveries.next().await, Some(Ok(b"c".to_vec())));
    }

    #[tokio::test]
    async fn test_drain_returns_early_when_idle() {
        let mut deliveries = stream::iter(bodies(&["a"])).chain(stream::pending());

        let batch = drain_until_idle(&mut deliveries, 3, Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(batch, vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_drain_returns_early_when_stream_ends() {
        let mut deliveries = stream::iter(bodies(&["a", "b"]));

        let batch = drain_until_idle(&mut deliveries, 5, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_surfaces_delivery_error() {
        let mut items = bodies(&["a"]);
        items.push(Err("connection reset"));
        let mut deliveries = stream::iter(items);

        let result = drain_until_idle(&mut deliveries, 3, Duration::from_millis(50)).await;

        assert_eq!(result, Err("connection reset"));
    }

    #[test]
    fn test_buffered_tail_stops_at_error() {
        let mut items = bodies(&["a", "b"]);
        items.push(Err("channel closed"));
        items.extend(bodies(&["c"]));
        let mut deliveries = stream::iter(items);
        let mut batch = vec![b"first".to_vec()];

        let error = drain_buffered(&mut deliveries, &mut batch);

        assert_eq!(error, Some("channel closed"));
        assert_eq!(batch, vec![b"first".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_buffered_tail_does_not_wait() {
        let mut deliveries = stream::iter(bodies(&["a"])).chain(stream::pending());
        let mut batch = Vec::new();

        assert_eq!(drain_buffered(&mut deliveries, &mut batch), None);
        assert_eq!(batch, vec![b"a".to_vec()]);
    }

    #[test]
    fn test_consumer_tags_are_unique() {
        let a = consumer_tag();
        let b = consumer_tag();
        assert!(a.starts_with("image-builder-drain-"));
        assert_ne!(a, b);
    }
}
