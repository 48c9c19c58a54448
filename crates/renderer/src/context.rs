//! Vulkan objects behind the frame loop.
//!
//! [`VulkanContext`] builds the whole object graph for one window and
//! implements [`FrameBackend`] on top of it.
//!
//! # Resource Destruction Order
//!
//! 1. Wait for the device to go idle
//! 2. Flush the swapchain deletion queue (framebuffers)
//! 3. Sync objects, command buffers, command pool
//! 4. Uniform buffers, descriptor pool and layout
//! 5. Pipeline, pipeline layout, render pass
//! 6. Swapchain
//! 7. Surface
//! 8. Device
//! 9. Instance
//!
//! ManuallyDrop is used to enforce this order.

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{debug, error, info, trace, warn};

use vkloop_core::RendererConfig;
use vkloop_core::config::DescriptorKind;
use vkloop_platform::{FramebufferSource, Surface, Window};
use vkloop_rhi::buffer::UniformBuffer;
use vkloop_rhi::command::{CommandBuffer, CommandPool, full_scissor, full_viewport};
use vkloop_rhi::deletion_queue::DeletionQueue;
use vkloop_rhi::descriptor::{
    DescriptorAllocator, DescriptorLayoutBuilder, DescriptorSetLayout, PoolSizeRatio,
    write_uniform_buffer,
};
use vkloop_rhi::device::Device;
use vkloop_rhi::framebuffer::create_framebuffers;
use vkloop_rhi::instance::{Instance, InstanceDesc};
use vkloop_rhi::physical_device::select_physical_device;
use vkloop_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use vkloop_rhi::render_pass::RenderPass;
use vkloop_rhi::shader::{Shader, ShaderStage};
use vkloop_rhi::swapchain::Swapchain;
use vkloop_rhi::sync::{FrameSync, create_frame_syncs};
use vkloop_rhi::{RhiError, RhiResult};

use crate::frame_loop::{
    AcquireOutcome, FrameBackend, PresentOutcome, RecreateOutcome, clamp_frames_in_flight,
};
use crate::uniforms::FrameUniforms;

/// Vertices emitted by the built-in triangle shader.
const TRIANGLE_VERTEX_COUNT: u32 = 3;

/// Every Vulkan object the frame loop touches, for one window.
pub struct VulkanContext {
    /// Vulkan instance (destroyed last).
    instance: ManuallyDrop<Instance>,
    /// Logical device (destroyed after everything created from it).
    device: ManuallyDrop<Arc<Device>>,
    /// Window surface (destroyed after the swapchain).
    surface: ManuallyDrop<Surface>,
    swapchain: ManuallyDrop<Swapchain>,
    render_pass: ManuallyDrop<RenderPass>,

    pipeline_layout: ManuallyDrop<PipelineLayout>,
    pipeline: ManuallyDrop<Pipeline>,

    descriptor_layout: ManuallyDrop<DescriptorSetLayout>,
    descriptor_allocator: ManuallyDrop<DescriptorAllocator>,
    /// One set per frame slot, bound at set 0.
    descriptor_sets: Vec<vk::DescriptorSet>,
    /// Backs binding 0 of the slot's set; rewritten every frame.
    uniform_buffers: Vec<UniformBuffer>,
    started: Instant,

    command_pool: ManuallyDrop<CommandPool>,
    /// One primary buffer per frame slot.
    command_buffers: Vec<CommandBuffer>,
    frame_syncs: Vec<FrameSync>,

    /// One per swapchain image, indexed by acquired image index.
    framebuffers: Vec<vk::Framebuffer>,
    /// Holds the framebuffers; flushed before every swapchain rebuild.
    swapchain_deletion_queue: DeletionQueue,

    extent_source: Box<dyn FramebufferSource>,
    clear_color: [f32; 4],
}

impl VulkanContext {
    /// Builds instance, surface, device, swapchain, pipeline, command and
    /// sync objects for `window`.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Everything created before it is destroyed.
    pub fn new(config: &RendererConfig, window: &Window) -> RhiResult<Self> {
        let frames_in_flight = clamp_frames_in_flight(config.frames_in_flight);

        let surface_extensions = window
            .required_surface_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let instance = Instance::new(&InstanceDesc {
            application_name: c"vkloop",
            surface_extensions: &surface_extensions,
            enable_validation: config.validation_enabled(),
            verbose_validation: config.validation_verbose,
        })?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let device = Device::new(&instance, &physical_device_info)?;

        let extent_source: Box<dyn FramebufferSource> = Box::new(window.extent_source());
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            extent_source.framebuffer_extent(),
        )?;

        let render_pass = RenderPass::single_color(device.clone(), swapchain.format())?;

        let descriptor_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(device.clone(), vk::ShaderStageFlags::VERTEX)?;

        let ratios: Vec<PoolSizeRatio> = config
            .descriptors
            .ratios
            .iter()
            .map(|r| PoolSizeRatio::new(descriptor_type(r.kind), r.ratio))
            .collect();
        let descriptor_allocator =
            DescriptorAllocator::new(device.clone(), config.descriptors.max_sets, &ratios)?;
        let descriptor_sets = (0..frames_in_flight)
            .map(|_| descriptor_allocator.allocate(&descriptor_layout))
            .collect::<RhiResult<Vec<_>>>()?;
        let uniform_buffers = (0..frames_in_flight)
            .map(|slot| {
                UniformBuffer::new(
                    device.clone(),
                    FrameUniforms::SIZE,
                    &format!("frame uniforms {}", slot),
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;
        for (&set, buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            write_uniform_buffer(&device, set, 0, buffer);
        }

        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[descriptor_layout.handle()], &[])?;
        let pipeline = Self::create_pipeline(&device, config, &render_pass, &pipeline_layout)?;

        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffers = command_pool.allocate_command_buffers(frames_in_flight as u32)?;
        let frame_syncs = create_frame_syncs(&device, frames_in_flight)?;

        let mut context = Self {
            instance: ManuallyDrop::new(instance),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            swapchain: ManuallyDrop::new(swapchain),
            render_pass: ManuallyDrop::new(render_pass),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            pipeline: ManuallyDrop::new(pipeline),
            descriptor_layout: ManuallyDrop::new(descriptor_layout),
            descriptor_allocator: ManuallyDrop::new(descriptor_allocator),
            descriptor_sets,
            uniform_buffers,
            started: Instant::now(),
            command_pool: ManuallyDrop::new(command_pool),
            command_buffers,
            frame_syncs,
            framebuffers: Vec::new(),
            swapchain_deletion_queue: DeletionQueue::new(),
            extent_source,
            clear_color: config.clear_color,
        };
        context.build_framebuffers()?;

        info!(
            "Vulkan context ready: {} frame(s) in flight, {} swapchain image(s), validation {}",
            frames_in_flight,
            context.swapchain.image_count(),
            if context.instance.has_validation() {
                "on"
            } else {
                "off"
            }
        );

        Ok(context)
    }

    /// Loads the configured shaders and builds the triangle pipeline.
    fn create_pipeline(
        device: &Arc<Device>,
        config: &RendererConfig,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
    ) -> RhiResult<Pipeline> {
        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shaders.vertex,
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shaders.fragment,
            ShaderStage::Fragment,
            "main",
        )?;

        // Shader modules can go as soon as the pipeline exists
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::Clockwise)
            .render_pass(render_pass.handle(), 0)
            .build(device.clone(), layout)?;

        info!("Triangle pipeline created");
        Ok(pipeline)
    }

    /// Creates one framebuffer per swapchain view, owned by the swapchain
    /// deletion queue.
    fn build_framebuffers(&mut self) -> RhiResult<()> {
        self.framebuffers = create_framebuffers(
            &self.device,
            self.render_pass.handle(),
            self.swapchain.image_views(),
            self.swapchain.extent(),
            &mut self.swapchain_deletion_queue,
        )?;
        Ok(())
    }

    /// Destroys the framebuffers. The device must be idle.
    fn destroy_framebuffers(&mut self) {
        self.framebuffers.clear();
        // SAFETY: callers wait for device idle first
        unsafe { self.swapchain_deletion_queue.flush(self.device.as_ref()) };
    }

    /// Current swapchain extent.
    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    /// Number of frame slots the context was built for.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    /// Blocks until all submitted work has finished.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

impl FrameBackend for VulkanContext {
    fn wait_for_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.frame_syncs[slot].in_flight().wait(u64::MAX)
    }

    fn reset_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.frame_syncs[slot].in_flight().reset()
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.frame_syncs[slot].image_available().handle();
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let framebuffer = *self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::SwapchainError(format!(
                    "No framebuffer for image {} ({} available)",
                    image_index,
                    self.framebuffers.len()
                ))
            })?;
        let extent = self.swapchain.extent();
        // The slot's fence has signaled, so the GPU is done with its buffer
        self.uniform_buffers[slot]
            .write_value(&FrameUniforms::new(self.started.elapsed(), extent))?;

        let cmd = &self.command_buffers[slot];

        cmd.reset()?;
        cmd.begin()?;
        cmd.begin_render_pass(
            self.render_pass.handle(),
            framebuffer,
            extent,
            self.clear_color,
        );
        cmd.bind_pipeline(self.pipeline.handle());
        cmd.bind_descriptor_sets(self.pipeline_layout.handle(), &[self.descriptor_sets[slot]]);
        cmd.set_viewport(&full_viewport(extent));
        cmd.set_scissor(&full_scissor(extent));
        cmd.draw(TRIANGLE_VERTEX_COUNT, 1, 0, 0);
        cmd.end_render_pass();
        cmd.end()?;

        trace!("Recorded slot {} for image {}", slot, image_index);
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let sync = &self.frame_syncs[slot];

        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished().handle()];
        let command_buffers = [self.command_buffers[slot].handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the buffer was just recorded and the fence reset
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight().handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let wait_semaphore = self.frame_syncs[slot].render_finished().handle();
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }

    fn recreate_swapchain(&mut self) -> RhiResult<RecreateOutcome> {
        let extent = self.extent_source.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            trace!("Framebuffer is {}x{}, deferring recreation", extent.width, extent.height);
            return Ok(RecreateOutcome::Deferred);
        }

        self.device.wait_idle()?;
        self.destroy_framebuffers();
        self.swapchain.recreate(extent)?;

        if self.swapchain.format() != self.render_pass.color_format() {
            warn!(
                "Surface format changed from {:?} to {:?}",
                self.render_pass.color_format(),
                self.swapchain.format()
            );
            return Err(RhiError::SwapchainError(
                "Surface format changed; render pass is incompatible".to_string(),
            ));
        }

        self.build_framebuffers()?;
        debug!(
            "Swapchain rebuilt at {}x{} with {} framebuffer(s)",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.framebuffers.len()
        );

        Ok(RecreateOutcome::Recreated)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during context drop: {:?}", e);
        }

        self.destroy_framebuffers();
        self.frame_syncs.clear();
        self.command_buffers.clear();
        self.descriptor_sets.clear();
        self.uniform_buffers.clear();

        unsafe {
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.descriptor_allocator);
            ManuallyDrop::drop(&mut self.descriptor_layout);
            ManuallyDrop::drop(&mut self.pipeline);
            ManuallyDrop::drop(&mut self.pipeline_layout);
            ManuallyDrop::drop(&mut self.render_pass);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Vulkan context destroyed");
    }
}

/// Maps a configured descriptor kind to its Vulkan type.
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
    }
}
