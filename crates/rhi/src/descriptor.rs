//! Descriptor set layouts and a fixed-size descriptor allocator.
//!
//! # Overview
//!
//! - [`DescriptorLayoutBuilder`] collects bindings and builds a [`DescriptorSetLayout`]
//!   with one set of shader stages applied to every binding
//! - [`DescriptorAllocator`] owns one pool sized from [`PoolSizeRatio`]s and hands
//!   out sets until it runs dry; it never grows
//! - [`write_uniform_buffer`] points a set's binding at a [`UniformBuffer`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio};
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkloop_rhi::RhiError> {
//! let mut builder = DescriptorLayoutBuilder::new();
//! builder.add_binding(0, vk::DescriptorType::UNIFORM_BUFFER);
//! let layout = builder.build(device.clone(), vk::ShaderStageFlags::VERTEX)?;
//!
//! let ratios = [PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)];
//! let allocator = DescriptorAllocator::new(device.clone(), 16, &ratios)?;
//! let _set = allocator.allocate(&layout)?;
//!
//! allocator.clear_descriptors()?;
//! allocator.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::buffer::UniformBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout from explicit bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Accumulates layout bindings; stages are chosen at build time.
#[derive(Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-descriptor binding.
    pub fn add_binding(&mut self, binding: u32, ty: vk::DescriptorType) -> &mut Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1),
        );
        self
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Number of bindings added so far.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if no binding was added.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Builds a layout with `stages` applied to every binding.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build(
        &self,
        device: Arc<Device>,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, &self.bindings_with_stages(stages))
    }

    fn bindings_with_stages(
        &self,
        stages: vk::ShaderStageFlags,
    ) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|binding| binding.stage_flags(stages))
            .collect()
    }
}

/// Share of the pool reserved for one descriptor type, per set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Fixed-capacity descriptor allocator backed by a single pool.
///
/// Sets are released all at once by [`clear_descriptors`](Self::clear_descriptors).
pub struct DescriptorAllocator {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorAllocator {
    /// Creates a pool for `max_sets` sets with `ratio * max_sets` descriptors per type.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        let sizes = pool_sizes(max_sets, ratios);

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, sizes={:?}",
            max_sets,
            sizes
                .iter()
                .map(|s| (s.ty, s.descriptor_count))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorPoolExhausted` when the pool is out of sets or
    /// descriptors, otherwise the Vulkan error.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.device
                .handle()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(allocation_error)?
        };

        sets.into_iter()
            .next()
            .ok_or(RhiError::DescriptorPoolExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    /// Returns every set allocated so far to the pool.
    ///
    /// No set from this pool may be in use by pending GPU work.
    pub fn clear_descriptors(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        debug!("Reset descriptor pool");
        Ok(())
    }

    /// Destroys the pool and every set allocated from it.
    pub fn destroy(self) {
        drop(self);
    }

    /// Returns the Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Capacity in sets.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Pool sizes for `max_sets` sets. Each type gets `ratio * max_sets`
/// descriptors, truncated, and never fewer than one.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| {
            let count = (r.ratio * max_sets as f32) as u32;
            vk::DescriptorPoolSize::default()
                .ty(r.ty)
                .descriptor_count(count.max(1))
        })
        .collect()
}

/// Points `binding` of `set` at the whole of `buffer`.
///
/// `set` must not be bound by a command buffer that is still pending.
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: &UniformBuffer,
) {
    let buffer_info = [buffer.descriptor_info()];
    let write = uniform_write(set, binding, &buffer_info);
    unsafe {
        device
            .handle()
            .update_descriptor_sets(std::slice::from_ref(&write), &[])
    };
}

fn uniform_write(
    set: vk::DescriptorSet,
    binding: u32,
    buffer_info: &[vk::DescriptorBufferInfo],
) -> vk::WriteDescriptorSet<'_> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(buffer_info)
}

fn allocation_error(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
            warn!("Descriptor pool exhausted ({})", result);
            RhiError::DescriptorPoolExhausted(result)
        }
        other => RhiError::VulkanError(other),
    }
}
