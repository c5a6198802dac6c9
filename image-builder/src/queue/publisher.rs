//! Publishing to queues and exchanges under a fixed deadline.
//!
//! Delivery is fire-and-forget: no publisher confirm is awaited, so `Ok(())`
//! means the frame was accepted for transmission, not that the broker
//! persisted it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use tracing::{debug, warn};

use super::error::PublishError;
use super::types::CONTENT_TYPE;
use super::MessagePublisher;

/// Deadline applied to every publish.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publisher backed by the broker's shared channel.
#[derive(Clone)]
pub struct Publisher {
    channel: Channel,
    timeout: Duration,
}

impl Publisher {
    pub(crate) fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    async fn publish(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
        target: &str,
    ) -> Result<(), PublishError> {
        let send = async {
            // The returned confirm is dropped; nothing waits on it.
            self.channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
                )
                .await
                .map(drop)
                .map_err(PublishError::Transport)
        };

        with_deadline(self.timeout, target, send).await?;

        debug!(
            exchange = exchange,
            routing_key = routing_key,
            body_length = payload.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for Publisher {
    async fn publish_to_queue(&self, payload: &[u8], queue: &str) -> Result<(), PublishError> {
        self.publish(payload, "", queue, queue).await
    }

    async fn publish_to_exchange(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), PublishError> {
        self.publish(payload, exchange, routing_key, exchange).await
    }
}

/// Run `send`, failing with [`PublishError::Timeout`] if it does not finish
/// within `deadline`.
pub async fn with_deadline<F>(deadline: Duration, target: &str, send: F) -> Result<(), PublishError>
where
    F: Future<Output = Result<(), PublishError>>,
{
    match tokio::time::timeout(deadline, send).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                target_name = target,
                timeout_ms = deadline.as_millis() as u64,
                "rabbitmq_publish_timeout"
            );
            Err(PublishError::Timeout {
                target: target.to_string(),
                after: deadline,
            })
        }
    }
}
