//! First-match GPU selection.
//!
//! A GPU qualifies when it has a graphics family, a family that presents to
//! the surface (possibly the same one), every extension in
//! [`REQUIRED_DEVICE_EXTENSIONS`], and at least one surface format and present
//! mode. Rejected GPUs are logged at debug with the reason.

use std::ffi::CStr;

use ash::vk;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::RhiError;
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Graphics and present family indices, unset until resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// True once both a graphics and a present family were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family {
            if !families.contains(&present) {
                families.push(present);
            }
        }

        families
    }

    /// Returns `(graphics, present)` when both are set.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics_family?, self.present_family?))
    }

    /// Scans `families` in order. The first graphics family wins; for
    /// presentation, a family that also does graphics beats an earlier
    /// present-only one so the two queues can alias.
    pub fn resolve(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;

            if family.queue_count == 0 {
                continue;
            }

            let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let has_present = supports_present(i);

            if has_graphics && indices.graphics_family.is_none() {
                indices.graphics_family = Some(i);
            }

            if has_present {
                let shares_graphics = indices.graphics_family == Some(i);
                if indices.present_family.is_none() || shares_graphics {
                    indices.present_family = Some(i);
                }
            }

            if indices.is_complete() && indices.graphics_family == indices.present_family {
                break;
            }
        }

        indices
    }
}

/// A GPU that passed selection.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    /// Everything the GPU supports; device creation enables a subset.
    pub features: vk::PhysicalDeviceFeatures,
    /// Always complete.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Driver-reported device name.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("unnamed")
    }

    /// Human-readable device type, e.g. "discrete".
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// `(major, minor, patch)` of the GPU's Vulkan version.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Why a GPU was passed over.
#[derive(Debug, Error)]
enum Rejection {
    #[error("no graphics queue family")]
    NoGraphicsFamily,
    #[error("no queue family can present to the surface")]
    NoPresentFamily,
    #[error("cannot enumerate extensions ({0})")]
    ExtensionQuery(vk::Result),
    #[error("missing device extension(s) {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("surface offers no formats or present modes")]
    InadequateSurface,
    #[error("surface query failed ({0})")]
    SurfaceQuery(RhiError),
}

/// Takes the first GPU, in driver order, that can render and present to
/// `surface`. Suitable devices are not ranked against each other.
///
/// # Errors
///
/// [`RhiError::NoVulkanDevice`] when there are no GPUs at all, and
/// [`RhiError::NoSuitableGpu`] when every GPU is rejected.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("Vulkan reports no GPUs");
        return Err(RhiError::NoVulkanDevice);
    }
    debug!("{} GPU candidate(s)", devices.len());

    for device in devices {
        match evaluate(instance, device, surface, surface_loader) {
            Ok(selected) => {
                let (major, minor, patch) = selected.api_version();
                info!(
                    "Using GPU '{}' ({}, Vulkan {}.{}.{}), queue families {:?}",
                    selected.device_name(),
                    selected.device_type_name(),
                    major,
                    minor,
                    patch,
                    selected.queue_families
                );
                return Ok(selected);
            }
            Err((name, reason)) => debug!("GPU '{}' rejected: {}", name, reason),
        }
    }

    warn!("Every GPU was rejected");
    Err(RhiError::NoSuitableGpu)
}

/// Runs the suitability checks in order: queue families, extensions, surface.
fn evaluate(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, (String, Rejection)> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unnamed".to_string());
    let reject = |reason| (name.clone(), reason);

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = QueueFamilyIndices::resolve(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });
    if queue_families.graphics_family.is_none() {
        return Err(reject(Rejection::NoGraphicsFamily));
    }
    if queue_families.present_family.is_none() {
        return Err(reject(Rejection::NoPresentFamily));
    }

    let available = unsafe { instance.enumerate_device_extension_properties(device) }
        .map_err(|e| reject(Rejection::ExtensionQuery(e)))?;
    let available_names: Vec<&CStr> = available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_extensions(&available_names, REQUIRED_DEVICE_EXTENSIONS);
    if !missing.is_empty() {
        let missing = missing
            .iter()
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();
        return Err(reject(Rejection::MissingExtensions(missing)));
    }

    let support = SwapchainSupportDetails::query(device, surface, surface_loader)
        .map_err(|e| reject(Rejection::SurfaceQuery(e)))?;
    if !support.is_adequate() {
        return Err(reject(Rejection::InadequateSurface));
    }

    Ok(PhysicalDeviceInfo {
        device,
        properties,
        features: unsafe { instance.get_physical_device_features(device) },
        queue_families,
    })
}

/// Returns the required extensions absent from `available`, in required order.
pub fn missing_extensions<'a>(available: &[&CStr], required: &[&'a CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
        assert!(indices.resolved().is_none());
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());

        let indices = QueueFamilyIndices {
            graphics_family: None,
            present_family: Some(0),
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.resolved(), Some((0, 0)));
    }

    #[test]
    fn test_unique_families_distinct() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_resolve_single_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let indices = QueueFamilyIndices::resolve(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_resolve_separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = QueueFamilyIndices::resolve(&families, |i| i == 1);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_resolve_prefers_shared_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        // Both families can present; the graphics one should be picked for both.
        let indices = QueueFamilyIndices::resolve(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_resolve_skips_empty_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = QueueFamilyIndices::resolve(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_resolve_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = QueueFamilyIndices::resolve(&families, |_| false);
        assert_eq!(indices.graphics_family, Some(0));
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_missing_extensions() {
        let available = [c"VK_KHR_maintenance1", ash::khr::swapchain::NAME];
        assert!(missing_extensions(&available, REQUIRED_DEVICE_EXTENSIONS).is_empty());

        let available = [c"VK_KHR_maintenance1"];
        assert_eq!(
            missing_extensions(&available, REQUIRED_DEVICE_EXTENSIONS),
            vec![ash::khr::swapchain::NAME]
        );
    }

    #[test]
    fn test_rejection_reasons_are_readable() {
        assert_eq!(
            Rejection::NoPresentFamily.to_string(),
            "no queue family can present to the surface"
        );
        let missing = Rejection::MissingExtensions(vec!["VK_KHR_swapchain".to_string()]);
        assert_eq!(
            missing.to_string(),
            "missing device extension(s) [\"VK_KHR_swapchain\"]"
        );
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(device_type_name(vk::PhysicalDeviceType::CPU), "CPU");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "Other");
    }
}
