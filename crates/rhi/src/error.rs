//! Error type shared by every RHI wrapper.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    /// A Vulkan call returned a failure code.
    #[error("Vulkan call failed: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// The Vulkan loader library could not be opened.
    #[error("Vulkan loader unavailable: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Validation layer {0} is not installed")]
    MissingValidationLayer(String),

    /// Enumeration returned zero physical devices.
    #[error("No Vulkan-capable GPU present")]
    NoVulkanDevice,

    /// GPUs exist, but none has the queues, extensions and surface support needed.
    #[error("No GPU meets the presentation requirements")]
    NoSuitableGpu,

    #[error("Surface: {0}")]
    SurfaceError(String),

    #[error("Swapchain: {0}")]
    SwapchainError(String),

    #[error("Shader: {0}")]
    ShaderError(String),

    #[error("Pipeline: {0}")]
    PipelineError(String),

    /// gpu-allocator could not place, map or free memory.
    #[error("GPU memory allocation failed: {0}")]
    AllocationError(#[from] gpu_allocator::AllocationError),

    /// A buffer write outside the buffer, or a buffer that is not host-mapped.
    #[error("Buffer: {0}")]
    BufferError(String),

    /// `OUT_OF_POOL_MEMORY` or `FRAGMENTED_POOL` from set allocation.
    #[error("Descriptor pool exhausted ({0})")]
    DescriptorPoolExhausted(ash::vk::Result),

    /// Used before initialization or after shutdown.
    #[error("Renderer is not initialized")]
    NotInitialized,
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;
