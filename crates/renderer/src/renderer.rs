//! Main renderer orchestration.
//!
//! This module provides the [`Renderer`] facade the application talks to. It
//! owns the configuration, the frame loop and, once initialized, the
//! [`VulkanContext`] the loop runs on.

use ash::vk;
use tracing::{error, info, warn};

use vkloop_core::RendererConfig;
use vkloop_platform::Window;
use vkloop_rhi::{RhiError, RhiResult};

use crate::context::VulkanContext;
use crate::frame_loop::{FrameLoop, FrameStatus};

/// Renderer facade over the Vulkan context and frame loop.
///
/// # Lifecycle
///
/// ```text
/// new -> initialize -> (resize | render_frame)* -> shutdown
/// ```
///
/// `render_frame` before `initialize` or after `shutdown` returns
/// [`RhiError::NotInitialized`].
pub struct Renderer {
    config: RendererConfig,
    frame_loop: FrameLoop,
    context: Option<VulkanContext>,
}

impl Renderer {
    /// Creates an uninitialized renderer.
    pub fn new(config: RendererConfig) -> Self {
        let frame_loop = FrameLoop::new(config.frames_in_flight);
        Self {
            config,
            frame_loop,
            context: None,
        }
    }

    /// Builds every Vulkan object for `window`.
    ///
    /// Returns false and logs the error chain on failure; nothing is left
    /// half-built. Calling it again on an initialized renderer is a no-op.
    pub fn initialize(&mut self, window: &Window) -> bool {
        if self.context.is_some() {
            warn!("Renderer already initialized");
            return true;
        }
        if !self.config_is_valid() {
            return false;
        }

        match VulkanContext::new(&self.config, window) {
            Ok(context) => {
                let extent = context.swapchain_extent();
                info!(
                    "Renderer initialized at {}x{}",
                    extent.width, extent.height
                );
                self.frame_loop = FrameLoop::new(context.frames_in_flight());
                self.context = Some(context);
                true
            }
            Err(e) => {
                error!("Renderer initialization failed: {}", error_chain(&e));
                false
            }
        }
    }

    /// Validates the configuration before any Vulkan object is created.
    fn config_is_valid(&self) -> bool {
        match self.config.validate() {
            Ok(()) => true,
            Err(e) => {
                error!("Renderer initialization failed: {}", error_chain(&e));
                false
            }
        }
    }

    /// Whether `initialize` succeeded and `shutdown` has not run.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Marks the framebuffer as resized. The swapchain is rebuilt at the
    /// start of the next frame.
    pub fn resize(&mut self) {
        self.frame_loop.request_recreate();
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize`, otherwise any fatal Vulkan error.
    pub fn render_frame(&mut self) -> RhiResult<FrameStatus> {
        let context = self.context.as_mut().ok_or(RhiError::NotInitialized)?;
        self.frame_loop.run_frame(context)
    }

    /// Waits for the GPU and destroys every Vulkan object. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.wait_idle() {
                error!("Failed to wait for device idle during shutdown: {}", e);
            }
            drop(context);
            info!(
                "Renderer shut down after {} frame(s)",
                self.frame_loop.frames_presented()
            );
        }
    }

    /// Frames queued for presentation since initialization.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }

    /// Frame slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.frame_loop.current_slot()
    }

    /// Swapchain extent, if initialized.
    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.context.as_ref().map(VulkanContext::swapchain_extent)
    }

    /// The configuration the renderer was created with.
    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.context.is_some() {
            warn!("Renderer dropped without shutdown, shutting down now");
            self.shutdown();
        }
    }
}

/// Formats an error followed by each of its sources.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
