//! Graphics pipelines for a single-color render pass.
//!
//! - [`PipelineLayout`]: descriptor set layouts plus push constant ranges
//! - [`Pipeline`]: an owned graphics pipeline
//! - [`GraphicsPipelineBuilder`]: shader stages plus the few knobs the frame
//!   loop needs; everything else is fixed
//!
//! Viewport and scissor are always dynamic, so a pipeline built here survives
//! swapchain recreation at any size.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::render_pass::RenderPass;
//! use vkloop_rhi::shader::{Shader, ShaderStage};
//! use vkloop_rhi::pipeline::{PipelineLayout, GraphicsPipelineBuilder};
//!
//! # fn example(device: Arc<Device>, render_pass: &RenderPass) -> Result<(), vkloop_rhi::RhiError> {
//! let vs = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/spirv/triangle.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let fs = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/spirv/triangle.frag.spv"),
//!     ShaderStage::Fragment,
//!     "main",
//! )?;
//!
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(&vs)
//!     .fragment_shader(&fs)
//!     .render_pass(render_pass.handle(), 0)
//!     .build(device.clone(), &layout)?;
//! # Ok(())
//! # }
//! ```

use std::slice;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// State supplied at record time instead of baked into the pipeline.
pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Owned `VkPipelineLayout`.
pub struct PipelineLayout {
    device: Arc<Device>,
    raw: vk::PipelineLayout,
}

impl PipelineLayout {
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let raw = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Pipeline layout: {} set layout(s), {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, raw })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.raw
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline_layout(self.raw, None) };
        debug!("Pipeline layout destroyed");
    }
}

/// Owned graphics `VkPipeline`.
pub struct Pipeline {
    device: Arc<Device>,
    raw: vk::Pipeline,
}

impl Pipeline {
    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.raw
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.raw, None) };
        debug!("Graphics pipeline destroyed");
    }
}

/// Which faces the rasterizer discards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding of front-facing triangles in framebuffer space (y down).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    /// Converts to the Vulkan winding order.
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            Self::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            Self::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Builds a pipeline for one subpass of a render pass.
///
/// Fixed state: no vertex input, triangle list, fill, one sample, no depth
/// or stencil, one opaque color attachment, dynamic viewport and scissor.
#[derive(Default)]
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    cull_mode: CullMode,
    front_face: FrontFace,
    render_pass: Option<(vk::RenderPass, u32)>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Creates a builder with back-face culling and counter-clockwise winding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Required.
    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Required.
    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    /// Defaults to [`CullMode::Back`].
    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    /// Required. The pipeline may only be used inside `subpass` of passes
    /// compatible with `render_pass`.
    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = Some((render_pass, subpass));
        self
    }

    /// # Errors
    ///
    /// `PipelineError` if a shader stage or the render pass was not set, or
    /// if the driver rejects the pipeline.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let vertex = self
            .vertex_shader
            .ok_or_else(|| RhiError::PipelineError("Vertex shader is required".to_string()))?;
        let fragment = self
            .fragment_shader
            .ok_or_else(|| RhiError::PipelineError("Fragment shader is required".to_string()))?;
        let (render_pass, subpass) = self
            .render_pass
            .filter(|(pass, _)| *pass != vk::RenderPass::null())
            .ok_or_else(|| RhiError::PipelineError("A render pass is required".to_string()))?;

        let stages = [vertex.stage_create_info(), fragment.stage_create_info()];

        // The vertex shader generates its own positions
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = rasterization_state(self.cull_mode, self.front_face);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachment = opaque_blend_attachment();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(slice::from_ref(&blend_attachment));
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(subpass);

        let raw = unsafe {
            device
                .handle()
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    slice::from_ref(&create_info),
                    None,
                )
                .map_err(|(_, result)| {
                    RhiError::PipelineError(format!("Graphics pipeline creation failed: {result}"))
                })?
        }
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("Driver returned no pipeline".to_string()))?;

        info!(
            "Graphics pipeline created (cull {:?}, front face {:?})",
            self.cull_mode, self.front_face
        );

        Ok(Pipeline { device, raw })
    }
}

fn rasterization_state(
    cull_mode: CullMode,
    front_face: FrontFace,
) -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(cull_mode.to_vk())
        .front_face(front_face.to_vk())
        .line_width(1.0)
}

/// Writes all channels, no blending.
fn opaque_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}
