use std::ffi::{c_char, c_void, CStr, CString};
use ash::vk;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use raw_window_handle::HasDisplayHandle;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::config::RenderConfig;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub enabled_layers: Vec<&'static CStr>,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    /// Builds the API connection. With validation enabled the validation layer must be present,
    /// and a debug messenger that forwards driver diagnostics to `log` is installed.
    pub fn new(config: &RenderConfig, display: &impl HasDisplayHandle) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .wrap_err("Failed to load the Vulkan library")?;

        let enabled_layers = if config.enable_validation {
            Self::check_validation_layers_supported(&entry)?;
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };

        let instance = Self::create_instance(&entry, config, &enabled_layers, display)?;

        let debug_utils = if config.enable_validation {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        log::info!(
            "Vulkan instance created (validation: {})",
            if config.enable_validation { "on" } else { "off" },
        );

        Ok(Self {
            entry,
            instance,
            enabled_layers,
            debug_utils,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &RenderConfig,
        enabled_layers: &[&'static CStr],
        display: &impl HasDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(config.app_name.as_str())?;
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"vkchain")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let enabled_layer_names = enabled_layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names =
            Self::get_required_instance_extensions(display, config.enable_validation)?
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        // Lets the messenger also see instance creation and destruction
        if config.enable_validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        unsafe { entry.create_instance(&instance_info, None) }.check("vkCreateInstance")
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)
        }
            .check("vkCreateDebugUtilsMessengerEXT")?;
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn get_required_instance_extensions(
        display: &impl HasDisplayHandle,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(
            display.display_handle()?.as_raw()
        )
            .check("vkEnumerateInstanceExtensionProperties")?
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(*ext)
            })
            .collect::<Vec<_>>();

        if enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let layer_properties = unsafe { entry.enumerate_instance_layer_properties() }
            .check("vkEnumerateInstanceLayerProperties")?;
        let supported_layers = layer_properties
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .collect::<Vec<_>>();

        if !supported_layers.contains(&VALIDATION_LAYER) {
            return Err(eyre!(
                "Validation layer {:?} requested but not supported",
                VALIDATION_LAYER
            ));
        }

        Ok(())
    }

    pub fn destroy_debug_messenger(&mut self) {
        if let Some((loader, messenger)) = self.debug_utils.take() {
            unsafe {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
        }
    }

    /// Every object created from the instance must already be gone
    pub fn destroy(&mut self) {
        self.destroy_debug_messenger();
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

fn message_type_tag(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "[Validation]"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "[Performance]"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "[General]"
    } else {
        "[Unknown]"
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = message_type_tag(message_type);
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            c"<no message>"
        } else {
            CStr::from_ptr((*p_callback_data).p_message)
        }
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[Verbose]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Warning]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Error]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Info]{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown]{} {:?}", msg_type, msg);
        }
    }

    // Never abort the call that triggered the message
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tags() {
        use vk::DebugUtilsMessageTypeFlagsEXT as Ty;
        assert_eq!(message_type_tag(Ty::GENERAL), "[General]");
        assert_eq!(message_type_tag(Ty::VALIDATION | Ty::PERFORMANCE), "[Validation]");
        assert_eq!(message_type_tag(Ty::PERFORMANCE), "[Performance]");
        assert_eq!(message_type_tag(Ty::empty()), "[Unknown]");
    }

    #[test]
    fn callback_never_claims_the_message() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default()
            .message(c"test message");
        let handled = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(handled, vk::FALSE);
    }
}
