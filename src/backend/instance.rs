// Vulkan Instance - the application's connection to the driver
//
// Responsibilities:
// - Verify requested extensions and layers against what the loader advertises
// - Instance creation
// - Instance-level function check
// - Debug messenger when VK_EXT_debug_utils is enabled

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::capabilities::{
    check_available_instance_extensions, check_available_instance_layers, extension_name,
    is_extension_supported, is_layer_supported, layer_name,
};
use super::error::{ExtensionScope, SetupError};
use super::functions::{resolve_tier, Tier, INSTANCE_LEVEL_FUNCTIONS};
use super::loader::VulkanLibrary;
use super::surface::required_surface_extensions;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What to ask of the driver when creating the instance
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    pub engine_name: String,
    pub api_version: u32,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
}

impl InstanceDesc {
    pub fn new(application_name: &str) -> Self {
        Self {
            application_name: application_name.to_string(),
            engine_name: "vk-init".to_string(),
            api_version: vk::API_VERSION_1_0,
            extensions: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Add an extension unless it is already requested
    pub fn require_extension(&mut self, name: &CStr) {
        if !self.extensions.iter().any(|e| e.as_c_str() == name) {
            self.extensions.push(name.to_owned());
        }
    }

    /// Add a layer unless it is already requested
    pub fn require_layer(&mut self, name: &CStr) {
        if !self.layers.iter().any(|l| l.as_c_str() == name) {
            self.layers.push(name.to_owned());
        }
    }

    /// Request the Khronos validation layer and the debug utils messenger
    pub fn enable_validation(&mut self) {
        self.require_layer(VALIDATION_LAYER);
        self.require_extension(DebugUtils::name());
    }
}

pub struct VulkanInstance {
    // Order matters for drop: the library must outlive the instance
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: ash::Instance,
    library: Arc<VulkanLibrary>,
}

impl VulkanInstance {
    pub fn new(library: Arc<VulkanLibrary>, desc: &InstanceDesc) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", desc.application_name);

        let entry = library.entry();

        // Step 1: Verify extensions
        let available_extensions = check_available_instance_extensions(entry)?;
        for extension in &available_extensions {
            log::debug!("Instance extension available: {}", extension_name(extension).to_string_lossy());
        }

        for extension in &desc.extensions {
            if !is_extension_supported(&available_extensions, extension) {
                log::error!(
                    "Extension named '{}' is not supported by an Instance object.",
                    extension.to_string_lossy()
                );
                return Err(SetupError::ExtensionNotSupported {
                    name: extension.to_string_lossy().into_owned(),
                    scope: ExtensionScope::Instance,
                }
                .into());
            }
        }

        // Step 2: Verify layers
        if !desc.layers.is_empty() {
            let available_layers = check_available_instance_layers(entry)?;
            for layer in &available_layers {
                log::debug!("Instance layer available: {}", layer_name(layer).to_string_lossy());
            }

            for layer in &desc.layers {
                if !is_layer_supported(&available_layers, layer) {
                    log::error!("Layer named '{}' is not supported.", layer.to_string_lossy());
                    return Err(SetupError::LayerNotSupported(layer.to_string_lossy().into_owned()).into());
                }
            }
        }

        // Step 3: Create instance
        let application_name = CString::new(desc.application_name.as_str())?;
        let engine_name = CString::new(desc.engine_name.as_str())?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(desc.api_version);

        let extension_names: Vec<_> = desc.extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_names: Vec<_> = desc.layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(SetupError::Vk)
            .context("Could not create Vulkan instance")?;

        // Step 4: Check instance-level functions before anything calls them
        let enabled: Vec<&CStr> = desc.extensions.iter().map(|e| e.as_c_str()).collect();
        let get_instance_proc_addr = entry.static_fn().get_instance_proc_addr;
        let handle = instance.handle();
        let resolved = resolve_tier(Tier::Instance, INSTANCE_LEVEL_FUNCTIONS, &enabled, |name| unsafe {
            get_instance_proc_addr(handle, name.as_ptr()).is_some()
        });
        if let Err(e) = resolved {
            unsafe { instance.destroy_instance(None) };
            return Err(e.into());
        }

        // Step 5: Debug messenger
        let debug_utils = if enabled.contains(&DebugUtils::name()) {
            match Self::setup_debug_messenger(entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            debug_utils,
            instance,
            library,
        }))
    }

    /// Create an instance that can present to windows of `display`'s kind
    pub fn with_wsi_extensions(
        library: Arc<VulkanLibrary>,
        desc: &InstanceDesc,
        display: RawDisplayHandle,
    ) -> Result<Arc<Self>> {
        let mut desc = desc.clone();
        for extension in required_surface_extensions(display)? {
            desc.require_extension(extension);
        }
        Self::new(library, &desc)
    }

    fn setup_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(SetupError::Vk)
            .context("Could not create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn entry(&self) -> &ash::Entry {
        self.library.entry()
    }
}

impl Drop for VulkanInstance {
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

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_names_are_not_duplicated() {
        let mut desc = InstanceDesc::new("test");
        desc.require_extension(c"VK_KHR_surface");
        desc.require_extension(c"VK_KHR_surface");
        desc.enable_validation();
        desc.enable_validation();

        assert_eq!(desc.extensions.len(), 2);
        assert_eq!(desc.layers, vec![VALIDATION_LAYER.to_owned()]);
        assert!(desc.extensions.iter().any(|e| e.as_c_str() == DebugUtils::name()));
    }

    #[test]
    fn default_desc_targets_vulkan_1_0() {
        let desc = InstanceDesc::new("test");
        assert_eq!(desc.api_version, vk::API_VERSION_1_0);
        assert!(desc.extensions.is_empty());
        assert!(desc.layers.is_empty());
    }
}
