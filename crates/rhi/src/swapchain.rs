//! `VkSwapchainKHR` plus its image views.
//!
//! Creation is split in two steps:
//! - [`SwapchainConfig::negotiate`] turns freshly queried [`SwapchainSupportDetails`]
//!   and the framebuffer size into a format, present mode, extent and image count.
//!   It touches no Vulkan state, so the policy is testable without a GPU.
//! - [`Swapchain::new`] applies that configuration and builds one view per image.
//!
//! Recreation never patches the swapchain in place. [`Swapchain::recreate`] destroys
//! the views and the swapchain, then builds both again from a new negotiation.
//! Framebuffers that reference the views are the caller's to tear down first.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::instance::Instance;
//! use vkloop_rhi::swapchain::Swapchain;
//! use vkloop_rhi::vk;
//!
//! # fn example(
//! #     instance: &Instance,
//! #     device: Arc<Device>,
//! #     surface: vk::SurfaceKHR,
//! #     image_available: vk::Semaphore,
//! #     render_finished: vk::Semaphore,
//! # ) -> Result<(), vkloop_rhi::RhiError> {
//! let size = vk::Extent2D { width: 1280, height: 720 };
//! let mut swapchain = Swapchain::new(instance, device.clone(), surface, size)?;
//!
//! let (image_index, _) = swapchain.acquire_next_image(image_available)?;
//! // record into the framebuffer for image_index, submit ...
//! match swapchain.present(device.present_queue(), image_index, render_finished) {
//!     Ok(false) => {}
//!     Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => swapchain.recreate(size)?,
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// What a surface offers a given physical device.
///
/// Queried fresh for every (re)creation, never cached.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Reads capabilities, formats and present modes of `surface` on
    /// `physical_device`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface offers {} format(s), {} present mode(s), min {} image(s)",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// A swapchain needs at least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Negotiated swapchain parameters.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    /// Chosen format and color space.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Chosen present mode.
    pub present_mode: vk::PresentModeKHR,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Minimum image count requested from the driver.
    pub image_count: u32,
}

impl SwapchainConfig {
    /// Picks format, present mode, extent and image count for a surface.
    ///
    /// `framebuffer_extent` is only consulted when the surface leaves the
    /// extent up to the application.
    ///
    /// # Errors
    ///
    /// Returns `SwapchainError` if the surface reports no formats or no present modes.
    pub fn negotiate(
        support: &SwapchainSupportDetails,
        framebuffer_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let config = Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer_extent),
            image_count: determine_image_count(&support.capabilities),
        };

        debug!(
            "Negotiated swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.image_count
        );

        Ok(config)
    }
}

/// A swapchain and one view per image.
///
/// The images belong to the swapchain; the views belong to this struct.
/// Use from one thread at a time.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    /// Needed to requery support on every rebuild.
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    config: SwapchainConfig,
}

impl Swapchain {
    /// Negotiates against `surface` and builds the swapchain and views.
    ///
    /// # Errors
    ///
    /// Surface query failures, `SwapchainError` when the surface offers no
    /// format or present mode, and creation failures.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        framebuffer_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let mut swapchain = Self {
            device,
            loader,
            surface_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            config: SwapchainConfig {
                surface_format: vk::SurfaceFormatKHR::default(),
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D::default(),
                image_count: 0,
            },
        };
        swapchain.build(framebuffer_extent)?;
        Ok(swapchain)
    }

    /// Destroys the swapchain and its views, then builds both again.
    ///
    /// Support is queried fresh, so a changed surface size or format list is
    /// picked up. Framebuffers referencing the old views must already be gone.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting for idle or rebuilding fails. On error the
    /// swapchain is left empty and may be recreated again.
    pub fn recreate(&mut self, framebuffer_extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Rebuilding swapchain for {}x{}",
            framebuffer_extent.width, framebuffer_extent.height
        );

        self.destroy_resources();
        self.build(framebuffer_extent)
    }

    /// Negotiates a configuration and creates the swapchain and views.
    fn build(&mut self, framebuffer_extent: vk::Extent2D) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        let config = SwapchainConfig::negotiate(&support, framebuffer_extent)?;

        let families = [self.device.graphics_family(), self.device.present_family()];
        let (sharing_mode, shared_families) = sharing_for(&families);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };
        self.image_views =
            create_image_views(&self.device, &self.images, config.surface_format.format)?;
        self.config = config;

        ensure_view_count(&self.images, &self.image_views)?;

        info!(
            "Swapchain {}x{} ({:?}, {:?}), {} image(s)",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.present_mode,
            self.images.len()
        );

        Ok(())
    }

    /// Acquires the next swapchain image for rendering.
    ///
    /// Returns `(image_index, suboptimal)`. `ERROR_OUT_OF_DATE_KHR` is returned
    /// as an error and means the swapchain must be recreated.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Presents `image_index` once `wait_semaphore` is signaled.
    ///
    /// Returns true if the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Returns the Vulkan swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Settings negotiated at the last (re)creation.
    #[inline]
    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    /// Color format of every image.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    /// Size of every image in pixels.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    /// Present mode chosen for this swapchain.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.config.present_mode
    }

    /// Number of images the driver actually created.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Views in image-index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Destroys the image views and the swapchain handle.
    fn destroy_resources(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let image_count = self.images.len();
        self.destroy_resources();
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.config.extent.width, self.config.extent.height, image_count
        );
    }
}

/// Chooses the surface format.
///
/// B8G8R8A8_SRGB with SRGB_NONLINEAR wherever it appears in the list,
/// otherwise the first reported format. `formats` must not be empty.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .unwrap_or_else(|| {
            debug!("Preferred format unavailable, using {:?}", formats[0].format);
            formats[0]
        })
}

/// Chooses MAILBOX if offered, else FIFO (always available).
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Chooses the swapchain extent.
///
/// The surface's current extent wins unless its width is `u32::MAX`, in which
/// case the framebuffer size is clamped to the surface's limits.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // 0 means no maximum
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Concurrent sharing when graphics and present live in different families.
fn sharing_for(families: &[u32; 2]) -> (vk::SharingMode, &[u32]) {
    if families[0] == families[1] {
        (vk::SharingMode::EXCLUSIVE, &[])
    } else {
        (vk::SharingMode::CONCURRENT, families.as_slice())
    }
}

/// Every image must have exactly one view.
fn ensure_view_count(images: &[vk::Image], views: &[vk::ImageView]) -> RhiResult<()> {
    if images.len() != views.len() {
        return Err(RhiError::SwapchainError(format!(
            "{} swapchain images but {} image views",
            images.len(),
            views.len()
        )));
    }
    Ok(())
}

/// One 2D color view per image, identity swizzle, single mip and layer.
///
/// Views made before a failure are destroyed before returning it.
fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let color_range = vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(1)
        .layer_count(1);

    let mut views = Vec::with_capacity(images.len());
    for (index, &image) in images.iter().enumerate() {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range);

        let view = unsafe { device.handle().create_image_view(&info, None) }.map_err(|e| {
            for &made in &views {
                unsafe { device.handle().destroy_image_view(made, None) };
            }
            RhiError::SwapchainError(format!("Image view {index} failed: {e:?}"))
        })?;
        views.push(view);
    }

    debug!("{} swapchain image view(s) ready", views.len());
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn free_extent_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 1500),
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn support(
        capabilities: vk::SurfaceCapabilitiesKHR,
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities,
            formats,
            present_modes,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb_at_any_position() {
        let preferred = surface_format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE);
        let others = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];

        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, preferred);
            let selected = choose_surface_format(&formats);
            assert_eq!(selected.format, PREFERRED_FORMAT, "position {position}");
            assert_eq!(selected.color_space, PREFERRED_COLOR_SPACE, "position {position}");
        }
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };

        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_within_limits() {
        let capabilities = free_extent_capabilities();
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;

        for width in [0, 1, 99, 100, 101, 800, 1999, 2000, 2001, u32::MAX - 1] {
            for height in [0, 50, 100, 600, 1500, 1501, 10_000] {
                let chosen = choose_extent(&capabilities, extent(width, height));
                assert!(chosen.width >= min.width && chosen.width <= max.width);
                assert!(chosen.height >= min.height && chosen.height <= max.height);
                if (min.width..=max.width).contains(&width) {
                    assert_eq!(chosen.width, width);
                }
                if (min.height..=max.height).contains(&height) {
                    assert_eq!(chosen.height, height);
                }
            }
        }
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 4);
    }

    #[test]
    fn test_negotiate_rejects_inadequate_support() {
        let no_formats = support(free_extent_capabilities(), vec![], vec![vk::PresentModeKHR::FIFO]);
        assert!(matches!(
            SwapchainConfig::negotiate(&no_formats, extent(800, 600)),
            Err(RhiError::SwapchainError(_))
        ));

        let no_modes = support(
            free_extent_capabilities(),
            vec![surface_format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE)],
            vec![],
        );
        assert!(SwapchainConfig::negotiate(&no_modes, extent(800, 600)).is_err());
    }

    #[test]
    fn test_negotiate_is_stable_for_unchanged_capabilities() {
        let details = support(
            free_extent_capabilities(),
            vec![
                surface_format(vk::Format::B8G8R8A8_UNORM, PREFERRED_COLOR_SPACE),
                surface_format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE),
            ],
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        );

        let first = SwapchainConfig::negotiate(&details, extent(1024, 768)).expect("negotiate");
        let second = SwapchainConfig::negotiate(&details, extent(1024, 768)).expect("negotiate");
        assert_eq!(first.surface_format.format, second.surface_format.format);
        assert_eq!(first.surface_format.color_space, second.surface_format.color_space);
        assert_eq!(first.present_mode, second.present_mode);
        assert_eq!(first.extent, second.extent);
        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first.surface_format.format, PREFERRED_FORMAT);
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(first.extent, extent(1024, 768));
        assert_eq!(first.image_count, 3);
    }

    #[test]
    fn test_sharing_mode_follows_queue_families() {
        let (mode, shared) = sharing_for(&[0, 0]);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(shared.is_empty());

        let families = [0, 2];
        let (mode, shared) = sharing_for(&families);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(shared, &[0, 2]);
    }

    #[test]
    fn test_ensure_view_count() {
        let images = [vk::Image::null(); 3];
        let views = [vk::ImageView::null(); 3];
        assert!(ensure_view_count(&images, &views).is_ok());
        assert!(matches!(
            ensure_view_count(&images, &views[..2]),
            Err(RhiError::SwapchainError(_))
        ));
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![vk::SurfaceFormatKHR::default()],
            vec![vk::PresentModeKHR::FIFO],
        );
        assert!(adequate.is_adequate());

        let no_formats = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![],
            vec![vk::PresentModeKHR::FIFO],
        );
        assert!(!no_formats.is_adequate());
    }
}
