//! The winit window and the Vulkan surface behind it.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkloop_core::config::WindowConfig;
use vkloop_core::{Error, Result};

/// Reports the drawable size in pixels.
///
/// Polled on every swapchain (re)creation. Zero in either dimension means
/// the window is minimized.
pub trait FramebufferSource {
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Owned `VkSurfaceKHR`.
///
/// Must be dropped after every swapchain built on it and before the instance.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created from the loader's instance, destroyed only here
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Surface destroyed");
    }
}

/// A resizable winit window.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;
        tracing::info!("Window '{}' opened at {}x{}", config.title, config.width, config.height);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Size handle that can outlive borrows of the window.
    pub fn extent_source(&self) -> WindowExtent {
        WindowExtent(self.window.clone())
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn required_surface_extensions(&self) -> Result<Vec<*const c_char>> {
        let (display, _) = self.raw_handles()?;
        required_surface_extensions(display)
    }

    /// # Errors
    ///
    /// `Error::Window` without usable handles, `Error::Vulkan` when the
    /// driver refuses the surface.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let (display, window) = self.raw_handles()?;

        // SAFETY: handles come from a live window; Surface::drop destroys it
        let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .map_err(|e| Error::Vulkan(format!("surface creation failed: {e}")))?;
        tracing::info!("Surface created");

        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

impl FramebufferSource for Window {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        extent_from_size(self.window.inner_size())
    }
}

/// Shared window handle used only to poll the framebuffer size.
#[derive(Clone)]
pub struct WindowExtent(Arc<WinitWindow>);

impl FramebufferSource for WindowExtent {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        extent_from_size(self.0.inner_size())
    }
}

fn extent_from_size(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D::default()
        .width(size.width)
        .height(size.height)
}

/// Instance extensions a surface on `display` needs. The pointers are to
/// static names.
///
/// # Errors
///
/// `Error::Vulkan` for platforms ash-window does not know.
pub fn required_surface_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("unsupported display platform: {e}")))?;

    // SAFETY: ash-window hands out nul-terminated static names
    let names: Vec<&CStr> = extensions
        .iter()
        .map(|&ext| unsafe { CStr::from_ptr(ext) })
        .collect();
    tracing::debug!("Surface extensions: {:?}", names);

    Ok(extensions.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_from_size() {
        let extent = extent_from_size(PhysicalSize::new(1024, 768));
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 768);
    }

    #[test]
    fn test_minimized_size_is_zero_extent() {
        let extent = extent_from_size(PhysicalSize::new(0, 0));
        assert_eq!(extent, vk::Extent2D::default());
    }

    #[test]
    fn test_window_extent_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WindowExtent>();
    }
}
