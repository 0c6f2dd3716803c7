//! Domain layer.

pub mod job;
pub mod slug;

pub use job::{Job, JobRequest, JobState, StaleThresholds};
pub use slug::{SlugGenerator, WordSlugGenerator};
