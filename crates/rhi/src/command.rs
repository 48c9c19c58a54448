//! Command pool and per-slot command buffers.
//!
//! The frame loop allocates one primary [`CommandBuffer`] per frame slot from
//! a single [`CommandPool`] on the graphics family, and re-records it every
//! time the slot comes around.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::command::CommandPool;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkloop_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let per_slot = pool.allocate_command_buffers(2)?;
//!
//! let cmd = &per_slot[0];
//! cmd.reset()?;
//! cmd.begin()?;
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::slice;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Pool whose buffers can be reset individually.
///
/// Record from one thread only.
pub struct CommandPool {
    device: Arc<Device>,
    raw: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool with `RESET_COMMAND_BUFFER` for `queue_family_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let raw = unsafe { device.handle().create_command_pool(&create_info, None)? };
        info!("Command pool ready on queue family {}", queue_family_index);

        Ok(Self {
            device,
            raw,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.raw
    }

    /// Queue family the pool's buffers may be submitted to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates `count` primary buffers. They are freed with the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let raw_buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        debug!("Allocated {} primary command buffer(s)", raw_buffers.len());

        Ok(raw_buffers
            .into_iter()
            .map(|raw| CommandBuffer::from_handle(self.device.clone(), raw))
            .collect())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.raw, None) };
        debug!("Command pool on queue family {} destroyed", self.queue_family_index);
    }
}

/// Recording interface over a pool-owned command buffer.
///
/// Does not own the handle; it dies with its [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    raw: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wraps a buffer allocated from a pool on `device`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device the pool belongs to
    /// * `raw` - A primary buffer that outlives this wrapper's use
    #[inline]
    pub fn from_handle(device: Arc<Device>, raw: vk::CommandBuffer) -> Self {
        Self { device, raw }
    }

    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.raw
    }

    #[inline]
    fn dev(&self) -> &ash::Device {
        self.device.handle()
    }

    /// Returns the buffer to the initial state. Its fence must have signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.dev()
                .reset_command_buffer(self.raw, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    /// Starts a one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not in the initial state.
    pub fn begin(&self) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.dev().begin_command_buffer(self.raw, &info)? };
        Ok(())
    }

    /// Finishes recording.
    ///
    /// # Errors
    ///
    /// Returns an error if any recorded command was invalid.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.dev().end_command_buffer(self.raw)? };
        Ok(())
    }

    /// Begins `render_pass` on `framebuffer` over all of `extent`, clearing
    /// its one color attachment to `clear_color`.
    ///
    /// # Arguments
    ///
    /// * `render_pass` - Render pass with a single color attachment
    /// * `framebuffer` - Framebuffer for the acquired swapchain image
    /// * `extent` - Render area, normally the swapchain extent
    /// * `clear_color` - RGBA clear value for the color attachment
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        };
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(slice::from_ref(&clear));

        unsafe {
            self.dev()
                .cmd_begin_render_pass(self.raw, &info, vk::SubpassContents::INLINE)
        };
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&self) {
        unsafe { self.dev().cmd_end_render_pass(self.raw) };
    }

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.dev()
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    /// Binds `sets` at set index 0 with no dynamic offsets.
    pub fn bind_descriptor_sets(&self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.dev().cmd_bind_descriptor_sets(
                self.raw,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            )
        };
    }

    /// Sets viewport 0. The pipeline declares the viewport dynamic.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.dev()
                .cmd_set_viewport(self.raw, 0, slice::from_ref(viewport))
        };
    }

    /// Sets scissor 0.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe { self.dev().cmd_set_scissor(self.raw, 0, slice::from_ref(scissor)) };
    }

    /// Non-indexed draw; vertices come from `gl_VertexIndex`.
    pub fn draw(&self, vertices: u32, instances: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.dev()
                .cmd_draw(self.raw, vertices, instances, first_vertex, first_instance)
        };
    }
}

/// Viewport covering `extent` with depth range [0, 1].
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::default()
        .width(extent.width as f32)
        .height(extent.height as f32)
        .max_depth(1.0)
}

/// Scissor covering `extent` from the origin.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::default().extent(extent)
}
