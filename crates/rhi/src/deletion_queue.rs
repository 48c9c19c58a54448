//! Deferred destruction of Vulkan handles.
//!
//! Handles are recorded as [`DeferredDestroy`] entries and destroyed together
//! by [`DeletionQueue::flush`], newest first. The queue only stores plain
//! handles; whoever flushes it provides the device through [`ResourceDestroyer`]
//! and must make sure the GPU no longer uses any of them.

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;

/// A handle waiting to be destroyed.
///
/// Only swapchain-scoped handles are deferred. Longer-lived objects are
/// destroyed by their own wrappers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredDestroy {
    Framebuffer(vk::Framebuffer),
}

/// Something that can destroy a [`DeferredDestroy`] entry.
pub trait ResourceDestroyer {
    /// Destroys one handle.
    ///
    /// # Safety
    ///
    /// The handle must have been created by this destroyer and must not be in use.
    unsafe fn destroy(&self, resource: DeferredDestroy);
}

impl ResourceDestroyer for Device {
    unsafe fn destroy(&self, resource: DeferredDestroy) {
        match resource {
            DeferredDestroy::Framebuffer(framebuffer) => unsafe {
                self.handle().destroy_framebuffer(framebuffer, None)
            },
        }
    }
}

/// LIFO list of handles to destroy.
#[derive(Debug, Default)]
pub struct DeletionQueue {
    pending: Vec<DeferredDestroy>,
}

impl DeletionQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a handle for later destruction.
    pub fn push(&mut self, resource: DeferredDestroy) {
        self.pending.push(resource);
    }

    /// Destroys every recorded handle in reverse order of registration.
    ///
    /// The queue is empty afterwards, so flushing twice destroys nothing the
    /// second time.
    ///
    /// # Safety
    ///
    /// The GPU must be done with every recorded handle, typically after a
    /// device wait-idle.
    pub unsafe fn flush(&mut self, destroyer: &impl ResourceDestroyer) {
        if self.pending.is_empty() {
            return;
        }

        debug!("Flushing deletion queue ({} entries)", self.pending.len());
        while let Some(resource) = self.pending.pop() {
            unsafe { destroyer.destroy(resource) };
        }
    }

    /// Number of handles waiting.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Deletion queue dropped with {} pending entries; handles leaked",
                self.pending.len()
            );
        }
    }
}
