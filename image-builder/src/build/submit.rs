//! Producer side: accept a request, tag it with a fresh id and enqueue it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use super::id::{IdError, IdGenerator};
use super::request::{BuildId, BuildRequest};
use crate::queue::{MessagePublisher, PublishError};

/// Why a submission was rejected. Nothing is published in any of these cases.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("error generating image id: {0}")]
    IdGeneration(#[from] IdError),

    #[error("request already carries image id {0}")]
    AlreadyAssigned(BuildId),

    #[error("error marshalling request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("error sending message to queue: {0}")]
    Publish(#[from] PublishError),
}

/// Front door of the pipeline, shared by every request handler.
pub struct SubmissionService {
    publisher: Arc<dyn MessagePublisher>,
    ids: Arc<dyn IdGenerator>,
    queue: String,
}

impl SubmissionService {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        ids: Arc<dyn IdGenerator>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            ids,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Assign an id, serialize and publish to the build queue.
    ///
    /// Returns the id only once the message has been handed to the broker.
    pub async fn submit(&self, mut request: BuildRequest) -> Result<BuildId, SubmissionError> {
        let image_id = self.ids.next_id()?;

        request
            .assign_id(image_id.clone())
            .map_err(SubmissionError::AlreadyAssigned)?;

        let body = request.to_body()?;

        if let Err(e) = self.publisher.publish_to_queue(&body, &self.queue).await {
            error!(
                queue = %self.queue,
                image_id = %image_id,
                error = %e,
                "build_request_publish_failed"
            );
            return Err(e.into());
        }

        info!(
            queue = %self.queue,
            image_id = %image_id,
            body_length = body.len(),
            "build_request_enqueued"
        );

        Ok(image_id)
    }
}
