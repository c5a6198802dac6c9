//! Build request payload and identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque token identifying one build request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image configuration plus the id assigned at submission.
///
/// The configuration is kept as a raw JSON object: its schema belongs to the
/// image generator, and this pipeline only carries it through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(rename = "imageId", default, skip_serializing_if = "Option::is_none")]
    image_id: Option<BuildId>,

    #[serde(flatten)]
    config: Map<String, Value>,
}

impl BuildRequest {
    /// Wrap a configuration object. Any `imageId` key in it is discarded.
    pub fn from_config(mut config: Map<String, Value>) -> Self {
        config.remove("imageId");
        Self {
            image_id: None,
            config,
        }
    }

    pub fn image_id(&self) -> Option<&BuildId> {
        self.image_id.as_ref()
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Attach `id`. Once set, an id never changes: a second assignment hands
    /// the existing id back as the error.
    pub fn assign_id(&mut self, id: BuildId) -> Result<(), BuildId> {
        match &self.image_id {
            Some(existing) => Err(existing.clone()),
            None => {
                self.image_id = Some(id);
                Ok(())
            }
        }
    }

    /// Serialize to the JSON body carried on the queue.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a JSON body taken off the queue.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
