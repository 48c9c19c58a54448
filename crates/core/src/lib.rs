//! Vulkan-free pieces shared across vkloop: config, logging, errors and
//! frame statistics.

pub mod config;
mod error;
mod logging;
mod stats;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging, init_logging_with};
pub use stats::{FrameReport, FrameStats};
