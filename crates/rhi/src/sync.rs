//! Semaphores and fences for frames in flight.
//!
//! Each frame slot owns one [`FrameSync`]:
//!
//! ```text
//! wait(in_flight) -> acquire(signal image_available)
//!   -> reset(in_flight) -> record
//!   -> submit(wait image_available, signal render_finished + in_flight)
//!   -> present(wait render_finished)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::sync::create_frame_syncs;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkloop_rhi::RhiError> {
//! let slots = create_frame_syncs(&device, 2)?;
//! slots[0].in_flight().wait(u64::MAX)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore, created unsignaled. Only queue operations touch it.
pub struct Semaphore {
    device: Arc<Device>,
    raw: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device that will own the semaphore
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let raw = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, raw })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.raw, None) };
    }
}

/// CPU-visible completion signal for one queue submission.
pub struct Fence {
    device: Arc<Device>,
    raw: vk::Fence,
}

impl Fence {
    /// Creates a fence. A `signaled` fence lets the first wait return at once.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device that will own the fence
    /// * `signaled` - Whether the fence starts in the signaled state
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let mut flags = vk::FenceCreateFlags::empty();
        if signaled {
            flags |= vk::FenceCreateFlags::SIGNALED;
        }

        let raw = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };

        Ok(Self { device, raw })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.raw
    }

    /// Blocks until signaled, or until `timeout_ns` elapses.
    ///
    /// # Errors
    ///
    /// `VulkanError(TIMEOUT)` on timeout, otherwise the driver's failure.
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(std::slice::from_ref(&self.raw), true, timeout_ns)?;
        }
        Ok(())
    }

    /// Unsignals the fence. No pending submission may reference it.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_fences(std::slice::from_ref(&self.raw))?;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.raw, None) };
    }
}

/// The semaphores and fence owned by one frame slot.
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Creates one slot's objects, with the fence already signaled.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// Signaled by acquire, waited on by submit.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Signaled by submit, waited on by present.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    /// Signaled when the slot's submission completes.
    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

/// Creates `count` frame slots.
///
/// # Errors
///
/// Returns the first creation failure; slots created before it are dropped.
pub fn create_frame_syncs(device: &Arc<Device>, count: usize) -> RhiResult<Vec<FrameSync>> {
    let slots = (0..count)
        .map(|_| FrameSync::new(device.clone()))
        .collect::<RhiResult<Vec<_>>>()?;

    info!("Created sync objects for {} frame(s) in flight", count);
    debug!("{} semaphores, {} fences", count * 2, count);

    Ok(slots)
}
