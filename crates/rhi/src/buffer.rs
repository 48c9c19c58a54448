//! Host-visible uniform buffers.
//!
//! Memory comes from the device's gpu-allocator in `CpuToGpu` memory, which
//! stays persistently mapped, so a write is a plain copy. Each frame slot
//! gets its own buffer; a slot is only written after its fence has signaled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkloop_rhi::buffer::UniformBuffer;
//! use vkloop_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkloop_rhi::RhiError> {
//! let tint = [1.0f32, 0.5, 0.5, 1.0];
//! let buffer = UniformBuffer::new(device, std::mem::size_of_val(&tint) as u64, "tint")?;
//! buffer.write_value(&tint)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// `VkBuffer` with `UNIFORM_BUFFER` usage and mapped memory.
pub struct UniformBuffer {
    device: Arc<Device>,
    raw: vk::Buffer,
    /// Taken in `drop` to hand back to the allocator.
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl UniformBuffer {
    /// Creates a buffer of `size` bytes and binds mapped memory to it.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device and its allocator
    /// * `size` - Buffer size in bytes
    /// * `name` - Allocation label shown in allocator reports
    ///
    /// # Errors
    ///
    /// `BufferError` for a zero size, `AllocationError` when no memory fits,
    /// otherwise the driver's error. Nothing leaks on failure.
    pub fn new(device: Arc<Device>, size: vk::DeviceSize, name: &str) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::BufferError(format!(
                "Uniform buffer '{}' must not be empty",
                name
            )));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { device.handle().create_buffer(&create_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(raw) };

        let allocation = device.allocator().and_then(|mut allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(raw, None) };
                return Err(e);
            }
        };

        let (memory, memory_offset) = unsafe { (allocation.memory(), allocation.offset()) };

        // From here on, drop cleans up both halves
        let buffer = Self {
            device,
            raw,
            allocation: Some(allocation),
            size,
        };
        unsafe {
            buffer
                .device
                .handle()
                .bind_buffer_memory(raw, memory, memory_offset)?;
        }

        debug!("Created uniform buffer '{}' ({} bytes)", name, size);
        Ok(buffer)
    }

    /// Copies `data` into the buffer at byte `offset`.
    ///
    /// The GPU must not be reading the buffer; in the frame loop that means
    /// the owning slot's fence has been waited on.
    ///
    /// # Errors
    ///
    /// `BufferError` if the write runs past the end or the memory is not
    /// mapped.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        check_write_range(self.size, offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| RhiError::BufferError("Uniform memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Writes `value` at the start of the buffer.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_value<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write(0, bytemuck::bytes_of(value))
    }

    /// Whole-buffer range for a descriptor write.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.raw)
            .offset(0)
            .range(self.size)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.raw
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free uniform buffer memory: {}", e);
                    }
                }
                Err(e) => error!("Uniform buffer memory leaked: {}", e),
            }
        }
        unsafe { self.device.handle().destroy_buffer(self.raw, None) };
        debug!("Destroyed uniform buffer ({} bytes)", self.size);
    }
}

/// Rejects writes of `len` bytes at `offset` that do not fit in `size`.
fn check_write_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::BufferError(format!(
            "Write of {} bytes at offset {} exceeds buffer size {}",
            len, offset, size
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_range_within_buffer() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 64, 0).is_ok());
    }

    #[test]
    fn test_write_range_past_end() {
        let err = check_write_range(64, 48, 32).unwrap_err();
        assert!(matches!(err, RhiError::BufferError(_)));
        assert_eq!(
            err.to_string(),
            "Buffer: Write of 32 bytes at offset 48 exceeds buffer size 64"
        );
    }

    #[test]
    fn test_write_range_offset_overflow() {
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_uniform_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UniformBuffer>();
    }
}
