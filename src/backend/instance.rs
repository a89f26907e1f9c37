// Vulkan Instance - entry point into the driver
//
// Responsibilities:
// - Load the Vulkan loader
// - Validation layer availability check
// - Instance creation with the window system's surface extensions
// - Debug messenger routing validation output into `log`

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

/// Layers enabled when validation is requested
pub const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// Vulkan instance wrapper with automatic cleanup
pub struct Instance {
    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl Instance {
    /// Create Vulkan instance
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `display_handle` - Display the surface will be created for
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `list_extensions` - Log every available instance extension
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
        list_extensions: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if list_extensions {
            log_available_extensions(&entry)?;
        }

        if enable_validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            let available_names: Vec<&CStr> = available
                .iter()
                .filter_map(|layer| layer.layer_name_as_c_str().ok())
                .collect();

            let missing = missing_layers(VALIDATION_LAYERS, &available_names);
            if !missing.is_empty() {
                anyhow::bail!("Validation layer unavailable: {:?}", missing);
            }
        }

        let app_name_cstr = application_name(app_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names: Vec<*const std::ffi::c_char> = if enable_validation {
            VALIDATION_LAYERS.iter().map(|name| name.as_ptr()).collect()
        } else {
            Vec::new()
        };

        // Chained so vkCreateInstance/vkDestroyInstance are validated too
        let mut instance_debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_messenger_create_info(), None)
            }
            .context("Failed to set up debug messenger")?;
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Application name as handed to the driver
fn application_name(app_name: &str) -> Result<CString> {
    CString::new(app_name).context("Window title contains a NUL byte")
}

/// Layers from `required` that are absent from `available`
pub fn missing_layers<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|layer| !available.iter().any(|name| *name == *layer))
        .collect()
}

fn log_available_extensions(entry: &Entry) -> Result<()> {
    let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
        .context("Failed to enumerate instance extensions")?;

    log::debug!("Available instance extensions:");
    for extension in &extensions {
        if let Ok(name) = extension.extension_name_as_c_str() {
            log::debug!("\t{}", name.to_string_lossy());
        }
    }

    Ok(())
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Log level a validation message is reported at
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }

    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::log!(
        severity_level(message_severity),
        "[Vulkan] {}",
        message.to_string_lossy()
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_missing_layers_when_all_available() {
        let available = [c"VK_LAYER_LUNARG_api_dump", c"VK_LAYER_KHRONOS_validation"];
        assert!(missing_layers(VALIDATION_LAYERS, &available).is_empty());
    }

    #[test]
    fn test_missing_validation_layer_reported() {
        let available = [c"VK_LAYER_LUNARG_api_dump"];
        assert_eq!(
            missing_layers(VALIDATION_LAYERS, &available),
            vec![c"VK_LAYER_KHRONOS_validation"]
        );
    }

    #[test]
    fn test_no_layers_available() {
        assert_eq!(missing_layers(VALIDATION_LAYERS, &[]).len(), 1);
    }

    #[test]
    fn test_nul_in_app_name_is_reported() {
        let err = application_name("Hello\0Triangle").unwrap_err();
        assert_eq!(err.to_string(), "Window title contains a NUL byte");
        assert_eq!(application_name("Hello Triangle").unwrap().as_bytes(), b"Hello Triangle");
    }

    #[test]
    fn test_severity_routing() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(severity_level(Severity::ERROR), log::Level::Error);
        assert_eq!(severity_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(severity_level(Severity::INFO), log::Level::Info);
        assert_eq!(severity_level(Severity::VERBOSE), log::Level::Trace);
    }

    #[test]
    fn test_debug_messenger_covers_all_severities() {
        let info = debug_messenger_create_info();
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(info.pfn_user_callback.is_some());
    }
}
