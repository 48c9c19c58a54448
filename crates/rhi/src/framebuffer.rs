//! Framebuffers for swapchain image views.
//!
//! Framebuffers are created per swapchain image and registered in a
//! [`DeletionQueue`] that lives as long as the swapchain does. Flushing that
//! queue before every swapchain rebuild keeps the two in lockstep.

use ash::vk;
use tracing::debug;

use crate::deletion_queue::{DeferredDestroy, DeletionQueue};
use crate::device::Device;
use crate::error::RhiResult;

/// Creates one framebuffer per view and records each in `deletion_queue`.
///
/// On failure the framebuffers created so far are already in the queue, so
/// flushing it releases them.
///
/// # Errors
///
/// Returns an error if framebuffer creation fails.
pub fn create_framebuffers(
    device: &Device,
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    extent: vk::Extent2D,
    deletion_queue: &mut DeletionQueue,
) -> RhiResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = [image_view];

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        deletion_queue.push(DeferredDestroy::Framebuffer(framebuffer));
        framebuffers.push(framebuffer);
    }

    debug!(
        "Created {} framebuffer(s) at {}x{}",
        framebuffers.len(),
        extent.width,
        extent.height
    );

    Ok(framebuffers)
}
