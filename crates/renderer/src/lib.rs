//! Frame loop and renderer facade.
//!
//! This crate orchestrates the per-frame work:
//! - [`FrameLoop`]: K frames in flight, acquire/record/submit/present, recreation
//! - [`VulkanContext`]: the Vulkan objects the loop drives
//! - [`Renderer`]: lifecycle facade used by the application
//! - [`uniforms::FrameUniforms`]: the per-slot uniform block the shader reads

pub mod context;
pub mod frame_loop;
mod renderer;
pub mod uniforms;

pub use context::VulkanContext;
pub use frame_loop::{
    AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome, RecreateOutcome,
};
pub use renderer::Renderer;
