//! Vulkan instance and validation messenger.
//!
//! The instance enables exactly the surface extensions the window's display
//! needs, plus `VK_EXT_debug_utils` when validation is requested and the
//! Khronos layer is installed.

use std::borrow::Cow;
use std::ffi::{CStr, CString};

use ash::{Entry, vk};
use raw_window_handle::RawDisplayHandle;
use tracing::{Level, error, info, warn};

use crate::error::RhiResult;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Lockstep";

/// Validation messenger and the loader that owns it.
struct Messenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Loaded Vulkan entry points and the instance created from them.
pub struct Instance {
    messenger: Option<Messenger>,
    instance: ash::Instance,
    entry: Entry,
}

impl Instance {
    /// Load Vulkan and create an instance able to present to `display`.
    ///
    /// # Errors
    ///
    /// Fails when the loader is missing, the display needs an extension the
    /// driver lacks, or instance creation is refused.
    pub fn new(app_name: &str, display: RawDisplayHandle, enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && has_layer(&entry, VALIDATION_LAYER)?;
        if enable_validation && !validation {
            warn!("{:?} is not installed, running without validation", VALIDATION_LAYER);
        }

        let mut extensions = ash_window::enumerate_required_extensions(display)?.to_vec();
        let mut layers = Vec::new();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_name = CString::new(app_name).unwrap_or_else(|_| ENGINE_NAME.to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Created Vulkan 1.3 instance for {:?} ({} extensions, validation {})",
            app_name,
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        let messenger = if validation {
            match create_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            messenger,
            instance,
            entry,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether validation messages are being routed to the log.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(messenger) = self.messenger.take() {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Destroyed Vulkan instance");
    }
}

fn has_layer(entry: &Entry, name: &CStr) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|layer| layer == name)))
}

fn create_messenger(entry: &Entry, instance: &ash::Instance) -> RhiResult<Messenger> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(on_validation_message));
    let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
    Ok(Messenger { loader, handle })
}

/// Log level for a validation message severity.
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else {
        Level::INFO
    }
}

fn message_kind(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// # Safety
///
/// Called by the Vulkan loader with a callback data pointer that is either
/// null or valid for the duration of the call.
unsafe extern "system" fn on_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = match unsafe { data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe {
            CStr::from_ptr(data.p_message).to_string_lossy()
        },
        _ => Cow::Borrowed("(no message)"),
    };
    let kind = message_kind(kind);

    let level = severity_level(severity);
    if level == Level::ERROR {
        error!(kind, "{}", message);
    } else if level == Level::WARN {
        warn!(kind, "{}", message);
    } else {
        info!(kind, "{}", message);
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_level() {
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            Level::ERROR
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            Level::WARN
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            Level::INFO
        );
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(message_kind(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION), "validation");
        assert_eq!(message_kind(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "performance");
        assert_eq!(message_kind(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL), "general");
    }
}
