//! Loader entry, `VkInstance` and the optional validation messenger.
//!
//! Requesting validation without the Khronos layer installed fails with
//! [`RhiError::MissingValidationLayer`]; it is never silently dropped.
//!
//! # Example
//!
//! ```no_run
//! use vkloop_rhi::instance::{Instance, InstanceDesc};
//!
//! # fn example() -> Result<(), vkloop_rhi::RhiError> {
//! // A windowed caller also fills in `surface_extensions`
//! let instance = Instance::new(&InstanceDesc {
//!     enable_validation: cfg!(debug_assertions),
//!     ..InstanceDesc::default()
//! })?;
//! assert_eq!(instance.has_validation(), cfg!(debug_assertions));
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, trace, warn};

use crate::error::RhiError;

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const API_VERSION: u32 = vk::API_VERSION_1_2;

#[derive(Clone, Copy, Debug)]
pub struct InstanceDesc<'a> {
    pub application_name: &'a CStr,
    /// Whatever the window system needs to create a surface.
    pub surface_extensions: &'a [*const c_char],
    pub enable_validation: bool,
    /// Also forward INFO and VERBOSE validation messages.
    pub verbose_validation: bool,
}

impl Default for InstanceDesc<'_> {
    fn default() -> Self {
        Self {
            application_name: c"vkloop",
            surface_extensions: &[],
            enable_validation: false,
            verbose_validation: false,
        }
    }
}

/// Owned `VkInstance`. The messenger, if any, is destroyed first on drop.
pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    /// Present exactly when validation is on.
    messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Loads Vulkan and creates the instance, plus a messenger that forwards
    /// validation output to `tracing` when `desc.enable_validation` is set.
    ///
    /// # Errors
    ///
    /// `LoadingError` without a loader, `MissingValidationLayer` when validation
    /// is requested but not installed, else the driver's error (an unsupported
    /// surface extension shows up here).
    pub fn new(desc: &InstanceDesc<'_>) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        if desc.enable_validation && !Self::is_validation_layer_available(&entry)? {
            error!("Validation layer requested but not installed");
            return Err(RhiError::MissingValidationLayer(
                VALIDATION_LAYER_NAME.to_string_lossy().into_owned(),
            ));
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(desc.application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkloop")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        let extensions = instance_extensions(desc.surface_extensions, desc.enable_validation);

        let layers = if desc.enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let raw = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan 1.2 instance created, {} extension(s), validation {}",
            extensions.len(),
            if desc.enable_validation { "on" } else { "off" }
        );

        let messenger = if desc.enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &raw);
            match create_messenger(&loader, desc.verbose_validation) {
                Ok(handle) => Some((loader, handle)),
                Err(e) => {
                    // Nothing owns the instance yet
                    unsafe { raw.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            raw,
            messenger,
        })
    }

    /// Returns the `ash` instance.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.raw
    }

    /// Returns the loaded Vulkan entry points.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether the validation layer and messenger are active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            layer_name == VALIDATION_LAYER_NAME
        });

        debug!(
            "{} instance layer(s) available, validation {}",
            available_layers.len(),
            if found { "present" } else { "missing" }
        );

        Ok(found)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, handle)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(handle, None);
                debug!("Validation messenger destroyed");
            }
            self.raw.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn create_messenger(
    loader: &ash::ext::debug_utils::Instance,
    verbose: bool,
) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(messenger_severity(verbose))
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
    Ok(handle)
}

/// Surface extensions, plus debug utils when validating.
fn instance_extensions(surface_extensions: &[*const c_char], validation: bool) -> Vec<*const c_char> {
    let mut extensions = surface_extensions.to_vec();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    extensions
}

/// WARNING and ERROR always; INFO and VERBOSE only when `verbose`.
fn messenger_severity(verbose: bool) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let base = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if verbose {
        base | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
    } else {
        base
    }
}

/// Short label for a message type.
fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Forwards validation output to `tracing`: ERROR to error, WARNING to warn,
/// INFO to debug, VERBOSE to trace.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = message_type_label(message_type);
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => debug!(target: "vulkan", kind, "{message}"),
        _ => trace!(target: "vulkan", kind, "{message}"),
    }

    // The triggering call must not be aborted
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        match Instance::new(&InstanceDesc::default()) {
            Ok(instance) => {
                assert!(!instance.has_validation());
            }
            Err(e) => {
                // No loader or no driver on this machine
                eprintln!("Skipping test: Vulkan not usable ({e})");
            }
        }
    }

    #[test]
    fn test_instance_creation_with_validation() {
        let desc = InstanceDesc {
            enable_validation: true,
            ..InstanceDesc::default()
        };
        match Instance::new(&desc) {
            Ok(instance) => {
                assert!(instance.has_validation());
                assert!(instance.messenger.is_some());
            }
            Err(RhiError::MissingValidationLayer(name)) => {
                assert_eq!(name, "VK_LAYER_KHRONOS_validation");
            }
            Err(e) => {
                eprintln!("Skipping test: Vulkan not usable ({e})");
            }
        }
    }

    #[test]
    fn test_instance_extensions_without_validation() {
        let surface = [ash::khr::surface::NAME.as_ptr()];
        let extensions = instance_extensions(&surface, false);
        assert_eq!(extensions, surface.to_vec());
    }

    #[test]
    fn test_instance_extensions_with_validation() {
        let surface = [ash::khr::surface::NAME.as_ptr()];
        let extensions = instance_extensions(&surface, true);
        assert_eq!(extensions.len(), 2);
        assert_eq!(extensions[0], surface[0]);
        assert_eq!(extensions[1], ash::ext::debug_utils::NAME.as_ptr());
    }

    #[test]
    fn test_message_type_label() {
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "validation"
        );
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE),
            "performance"
        );
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL),
            "general"
        );
    }

    #[test]
    fn test_messenger_severity() {
        let quiet = messenger_severity(false);
        assert!(quiet.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(quiet.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(!quiet.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));

        let verbose = messenger_severity(true);
        assert!(verbose.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(verbose.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
    }
}
