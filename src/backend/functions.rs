// Function tables - which entry points each loading tier must provide
//
// Vulkan functions are reached in four tiers:
// - exported: symbols read straight out of the loader library
// - global:   vkGetInstanceProcAddr(NULL, name)
// - instance: vkGetInstanceProcAddr(instance, name)
// - device:   vkGetDeviceProcAddr(device, name)
//
// ash builds its own dispatch tables, but it silently swaps missing entry
// points for panicking stubs. These tables are walked first so a missing
// function is reported by name before anything gets called.

use std::ffi::CStr;
use std::fmt;

use super::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Exported,
    Global,
    Instance,
    Device,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Exported => "exported",
            Tier::Global => "global level",
            Tier::Instance => "instance-level",
            Tier::Device => "device-level",
        };
        f.write_str(name)
    }
}

/// One entry point, optionally gated on an extension being enabled
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static CStr,
    pub extension: Option<&'static CStr>,
}

const fn core(name: &'static CStr) -> FunctionSpec {
    FunctionSpec { name, extension: None }
}

const fn from_extension(name: &'static CStr, extension: &'static CStr) -> FunctionSpec {
    FunctionSpec { name, extension: Some(extension) }
}

pub const EXPORTED_FUNCTIONS: &[FunctionSpec] = &[core(c"vkGetInstanceProcAddr")];

pub const GLOBAL_LEVEL_FUNCTIONS: &[FunctionSpec] = &[
    core(c"vkEnumerateInstanceExtensionProperties"),
    core(c"vkEnumerateInstanceLayerProperties"),
    core(c"vkCreateInstance"),
];

pub const INSTANCE_LEVEL_FUNCTIONS: &[FunctionSpec] = &[
    core(c"vkEnumeratePhysicalDevices"),
    core(c"vkEnumerateDeviceExtensionProperties"),
    core(c"vkGetPhysicalDeviceFeatures"),
    core(c"vkGetPhysicalDeviceProperties"),
    core(c"vkGetPhysicalDeviceQueueFamilyProperties"),
    core(c"vkCreateDevice"),
    core(c"vkGetDeviceProcAddr"),
    core(c"vkDestroyInstance"),
    // VK_KHR_surface
    from_extension(c"vkGetPhysicalDeviceSurfaceSupportKHR", c"VK_KHR_surface"),
    from_extension(c"vkGetPhysicalDeviceSurfaceCapabilitiesKHR", c"VK_KHR_surface"),
    from_extension(c"vkGetPhysicalDeviceSurfaceFormatsKHR", c"VK_KHR_surface"),
    from_extension(c"vkGetPhysicalDeviceSurfacePresentModesKHR", c"VK_KHR_surface"),
    from_extension(c"vkDestroySurfaceKHR", c"VK_KHR_surface"),
    // Platform surfaces
    from_extension(c"vkCreateWin32SurfaceKHR", c"VK_KHR_win32_surface"),
    from_extension(c"vkCreateXlibSurfaceKHR", c"VK_KHR_xlib_surface"),
    from_extension(c"vkCreateXcbSurfaceKHR", c"VK_KHR_xcb_surface"),
    from_extension(c"vkCreateWaylandSurfaceKHR", c"VK_KHR_wayland_surface"),
    // VK_EXT_debug_utils
    from_extension(c"vkCreateDebugUtilsMessengerEXT", c"VK_EXT_debug_utils"),
    from_extension(c"vkDestroyDebugUtilsMessengerEXT", c"VK_EXT_debug_utils"),
];

pub const DEVICE_LEVEL_FUNCTIONS: &[FunctionSpec] = &[
    core(c"vkGetDeviceQueue"),
    core(c"vkDeviceWaitIdle"),
    core(c"vkDestroyDevice"),
    // VK_KHR_swapchain
    from_extension(c"vkCreateSwapchainKHR", c"VK_KHR_swapchain"),
    from_extension(c"vkGetSwapchainImagesKHR", c"VK_KHR_swapchain"),
    from_extension(c"vkAcquireNextImageKHR", c"VK_KHR_swapchain"),
    from_extension(c"vkQueuePresentKHR", c"VK_KHR_swapchain"),
    from_extension(c"vkDestroySwapchainKHR", c"VK_KHR_swapchain"),
];

impl FunctionSpec {
    /// Core functions always apply; extension functions only when the
    /// extension is in the enabled list.
    pub fn applies_to(&self, enabled_extensions: &[&CStr]) -> bool {
        match self.extension {
            None => true,
            Some(extension) => enabled_extensions.iter().any(|&e| e == extension),
        }
    }
}

/// Resolve every applicable entry of `table` through `lookup`.
///
/// `lookup` returns whether the loader handed back a non-null pointer for the
/// given name. Stops at the first miss. Returns how many functions resolved.
pub fn resolve_tier<F>(
    tier: Tier,
    table: &[FunctionSpec],
    enabled_extensions: &[&CStr],
    mut lookup: F,
) -> Result<usize, SetupError>
where
    F: FnMut(&CStr) -> bool,
{
    let mut resolved = 0;

    for function in table.iter().filter(|f| f.applies_to(enabled_extensions)) {
        if !lookup(function.name) {
            log::error!(
                "Could not load {} Vulkan function named: {}",
                tier,
                function.name.to_string_lossy()
            );
            return Err(SetupError::MissingFunction {
                tier,
                name: function.name.to_string_lossy().into_owned(),
            });
        }
        log::debug!("Loaded {} function {}", tier, function.name.to_string_lossy());
        resolved += 1;
    }

    log::info!("Loaded {} {} functions", resolved, tier);
    Ok(resolved)
}
