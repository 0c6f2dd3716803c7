//! Repository layer for database access.

pub mod job;
pub mod stats;
pub mod video;

pub use job::*;
pub use stats::*;
pub use video::*;
