//! highlight-reel library crate.
//!
//! Job queue, scheduler and clip pipeline behind the highlight compilation
//! service. Exposed as a library for integration testing.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod service;
pub mod utils;

pub use error::{Error, Result};
pub use service::HighlightService;
