//! Thin owning wrappers over the `ash` handles vkloop needs.
//!
//! Each wrapper holds an `Arc<Device>` (or the instance) and destroys its
//! handle on drop. Nothing here knows about frames in flight; the renderer
//! crate sequences these pieces into a frame loop.

mod error;

pub mod buffer;
pub mod command;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
