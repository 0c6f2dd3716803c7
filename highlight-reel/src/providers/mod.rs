//! External collaborators: the clip provider and the publishing platform.

pub mod clip_provider;
pub mod publisher;

pub use clip_provider::{ClipCandidate, ClipProvider, ClipQuery, ClipResponse, NbaStatsClient, StatContext};
pub use publisher::{CommandPublisher, PublishRequest, Publisher};
