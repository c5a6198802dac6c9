//! Topology names and message types shared by the publisher and consumer sides.
//!
//! ```text
//! Gateway → buildQueue → Image generator
//!                 status (direct exchange) → bound status queues
//! ```

/// Default name of the queue carrying serialized build requests.
pub const BUILD_QUEUE: &str = "buildQueue";

/// Default name of the direct exchange used for status updates.
pub const STATUS_EXCHANGE: &str = "status";

/// Content type attached to every published body (UTF-8 JSON text).
pub const CONTENT_TYPE: &str = "text/plain";

/// Names of the topology entities declared when the broker is initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub build_queue: String,
    pub status_exchange: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            build_queue: BUILD_QUEUE.to_string(),
            status_exchange: STATUS_EXCHANGE.to_string(),
        }
    }
}

/// A single delivery retrieved from a queue.
///
/// The body may legitimately be empty; "no message available" is expressed
/// by the consumer returning `None`, never by an empty `Message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub delivery_tag: u64,
}

impl Message {
    pub fn new(body: Vec<u8>, delivery_tag: u64) -> Self {
        Self {
            body,
            content_type: Some(CONTENT_TYPE.to_string()),
            delivery_tag,
        }
    }

    /// Lossy UTF-8 preview of the body, capped at `max` bytes. Used for logging.
    pub fn preview(&self, max: usize) -> String {
        String::from_utf8_lossy(&self.body[..self.body.len().min(max)]).into_owned()
    }
}
