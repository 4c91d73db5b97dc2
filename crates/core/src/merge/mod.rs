//! Event merge layer

pub mod post_process;
pub mod service;

pub use post_process::{EventPostProcessor, ParticipantColorProcessor};
pub use service::{MergeService, MergeSettings};
