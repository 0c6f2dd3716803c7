//! Database models.

pub mod job;
pub mod stats;
pub mod video;

pub use job::JobDbModel;
pub use stats::{GameDbModel, PlayerDbModel};
pub use video::VideoDbModel;
