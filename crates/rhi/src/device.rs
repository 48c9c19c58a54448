//! Logical device with its graphics and present queues and the gpu-allocator
//! instance that backs buffer memory.
//!
//! Every wrapper that creates handles from the device holds an `Arc<Device>`,
//! so the device outlives all of them. The allocator is released before the
//! device itself is destroyed.
//!
//! # Example
//!
//! ```no_run
//! use vkloop_rhi::instance::{Instance, InstanceDesc};
//! use vkloop_rhi::physical_device::select_physical_device;
//! use vkloop_rhi::device::Device;
//! use ash::vk;
//!
//! # fn example(surface: vk::SurfaceKHR) -> Result<(), vkloop_rhi::RhiError> {
//! let instance = Instance::new(&InstanceDesc::default())?;
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = Device::new(&instance, &gpu)?;
//! device.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::AllocationError;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

const QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Owned `VkDevice`.
pub struct Device {
    raw: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    /// Same handle as `graphics_queue` when the families coincide.
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    enabled_features: vk::PhysicalDeviceFeatures,
    /// Dropped by hand ahead of `destroy_device`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl Device {
    /// One queue per distinct family. Anisotropy and sample-rate shading are
    /// switched on only where `physical_device_info` says they exist.
    ///
    /// # Errors
    ///
    /// `SurfaceError` for unresolved queue families, else the driver's error.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = physical_device_info.queue_families;
        let (graphics_family, present_family) = queue_families.resolved().ok_or_else(|| {
            RhiError::SurfaceError("Queue families are incomplete".to_string())
        })?;

        let unique_families = queue_families.unique_families();
        let queue_create_infos = queue_create_infos(&unique_families);

        debug!("Queue families in use: {:?}", unique_families);

        let features = requested_features(&physical_device_info.features);
        if features.sampler_anisotropy == vk::FALSE {
            warn!("GPU lacks sampler anisotropy");
        }
        if features.sample_rate_shading == vk::FALSE {
            warn!("GPU lacks sample-rate shading");
        }

        let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let raw = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };
        let (graphics_queue, present_queue) = unsafe {
            (
                raw.get_device_queue(graphics_family, 0),
                raw.get_device_queue(present_family, 0),
            )
        };

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: raw.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!(
            "Logical device ready (graphics family {}, present family {})",
            graphics_family, present_family
        );

        Ok(Arc::new(Self {
            raw,
            physical_device: physical_device_info.device,
            graphics_queue,
            present_queue,
            queue_families,
            enabled_features: features,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        }))
    }

    /// Returns the `ash` device.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.raw
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue that receives every frame submission.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue used for `vkQueuePresentKHR`.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        // Device::new refuses incomplete indices
        self.queue_families.graphics_family.unwrap_or_default()
    }

    #[inline]
    pub fn present_family(&self) -> u32 {
        self.queue_families.present_family.unwrap_or_default()
    }

    /// The subset of requested features the GPU actually had.
    #[inline]
    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    /// Locks the memory allocator.
    ///
    /// # Errors
    ///
    /// `AllocationError` if an earlier holder panicked with the lock taken.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator.lock().map_err(|_| {
            RhiError::AllocationError(AllocationError::Internal(
                "allocator lock poisoned".to_string(),
            ))
        })
    }

    /// Blocks until every queue has drained.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.raw.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue, signaling `fence` on completion.
    ///
    /// # Safety
    ///
    /// Every referenced command buffer is fully recorded, and `fence` is
    /// unsignaled with no other submission pending on it.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.raw
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.raw.device_wait_idle() {
                tracing::error!("Device did not go idle before destruction: {:?}", e);
            }
            // Frees the allocator's memory blocks while the device is alive
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: only Copy handles besides ash::Device, which is Send + Sync, and
// the allocator, which is only reached through its Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// One queue create info per family, each with a single queue at priority 1.0.
fn queue_create_infos(families: &[u32]) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
    families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITIES)
        })
        .collect()
}

/// Features to enable: anisotropy and sample-rate shading, masked by support.
fn requested_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .sample_rate_shading(supported.sample_rate_shading == vk::TRUE)
}
