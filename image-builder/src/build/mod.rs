//! Build requests and the producer side of the pipeline.
//!
//! ```text
//! BuildRequest → SubmissionService::submit() → buildQueue
//! ```

pub mod id;
pub mod request;
pub mod submit;

pub use id::{IdError, IdGenerator, SequenceIdGenerator};
pub use request::{BuildId, BuildRequest};
pub use submit::{SubmissionError, SubmissionService};
