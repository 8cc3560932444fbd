// Capabilities - what the driver and each GPU advertise
//
// Thin wrappers over the enumeration calls plus the small amount of
// selection logic built on top of them (extension/layer matching and
// queue family choice).

use anyhow::Result;
use ash::{vk, Entry};
use std::ffi::CStr;

use super::error::SetupError;

/// Extension name as a C string
pub fn extension_name(extension: &vk::ExtensionProperties) -> &CStr {
    unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }
}

/// Layer name as a C string
pub fn layer_name(layer: &vk::LayerProperties) -> &CStr {
    unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }
}

fn contains(haystack: &CStr, needle: &CStr) -> bool {
    let haystack = haystack.to_bytes();
    let needle = needle.to_bytes();
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

/// True when any advertised extension name contains `extension`
pub fn is_extension_supported(available: &[vk::ExtensionProperties], extension: &CStr) -> bool {
    available
        .iter()
        .any(|available| contains(extension_name(available), extension))
}

/// True when any advertised layer name contains `layer`
pub fn is_layer_supported(available: &[vk::LayerProperties], layer: &CStr) -> bool {
    available
        .iter()
        .any(|available| contains(layer_name(available), layer))
}

pub fn check_available_instance_extensions(entry: &Entry) -> Result<Vec<vk::ExtensionProperties>> {
    let extensions = entry.enumerate_instance_extension_properties(None).map_err(|e| {
        log::error!("Could not enumerate instance extensions: {:?}", e);
        SetupError::Vk(e)
    })?;

    if extensions.is_empty() {
        log::error!("Could not get the number of instance extensions.");
        return Err(SetupError::EmptyEnumeration("instance extensions").into());
    }

    Ok(extensions)
}

/// An empty layer list is normal, so only the call itself can fail
pub fn check_available_instance_layers(entry: &Entry) -> Result<Vec<vk::LayerProperties>> {
    let layers = entry.enumerate_instance_layer_properties().map_err(|e| {
        log::error!("Could not enumerate instance layers: {:?}", e);
        SetupError::Vk(e)
    })?;

    Ok(layers)
}

pub fn check_available_device_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<vk::ExtensionProperties>> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| {
            log::error!("Could not enumerate device extensions: {:?}", e);
            SetupError::Vk(e)
        })?;

    if extensions.is_empty() {
        log::error!("Could not get the number of device extensions.");
        return Err(SetupError::EmptyEnumeration("device extensions").into());
    }

    Ok(extensions)
}

pub fn enumerate_available_physical_devices(instance: &ash::Instance) -> Result<Vec<vk::PhysicalDevice>> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        log::error!("Could not enumerate physical devices: {:?}", e);
        SetupError::Vk(e)
    })?;

    if devices.is_empty() {
        log::error!("Could not get the number of available physical devices.");
        return Err(SetupError::EmptyEnumeration("available physical devices").into());
    }

    Ok(devices)
}

pub fn get_features_and_properties(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> (vk::PhysicalDeviceFeatures, vk::PhysicalDeviceProperties) {
    unsafe {
        (
            instance.get_physical_device_features(physical_device),
            instance.get_physical_device_properties(physical_device),
        )
    }
}

pub fn check_available_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<vk::QueueFamilyProperties>> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    if families.is_empty() {
        log::error!("Could not get the number of queue families.");
        return Err(SetupError::EmptyEnumeration("queue families").into());
    }

    Ok(families)
}

/// First family that has queues and every bit of `desired`
pub fn select_queue_family_index(
    families: &[vk::QueueFamilyProperties],
    desired: vk::QueueFlags,
) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_count > 0 && family.queue_flags.contains(desired))
        .map(|index| index as u32)
}

/// First family that has queues and can present, according to `supports_present`
pub fn select_present_queue_family_index<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<Option<u32>>
where
    F: FnMut(u32) -> Result<bool>,
{
    for (index, family) in families.iter().enumerate() {
        if family.queue_count > 0 && supports_present(index as u32)? {
            return Ok(Some(index as u32));
        }
    }
    Ok(None)
}

pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Log everything the driver reports about one physical device
pub fn describe_physical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let (features, properties) = get_features_and_properties(instance, physical_device);

    log::info!("Physical device: {} ({:?})", device_name(&properties), properties.device_type);
    log::info!(
        "  API Version: {}.{}.{}",
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version)
    );
    log::info!(
        "  Geometry shader: {}, tessellation shader: {}",
        features.geometry_shader == vk::TRUE,
        features.tessellation_shader == vk::TRUE
    );

    let extensions = check_available_device_extensions(instance, physical_device)?;
    log::info!("  {} device extensions", extensions.len());
    for extension in &extensions {
        log::debug!("    {}", extension_name(extension).to_string_lossy());
    }

    let families = check_available_queue_families(instance, physical_device)?;
    for (index, family) in families.iter().enumerate() {
        log::info!(
            "  Queue family {}: {} queues, {:?}",
            index,
            family.queue_count,
            family.queue_flags
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_char;

    fn write_name(dst: &mut [c_char], name: &str) {
        for (dst, src) in dst.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        write_name(&mut props.extension_name, name);
        props
    }

    fn layer(name: &str) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        write_name(&mut props.layer_name, name);
        props
    }

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn extension_lookup_matches_advertised_names() {
        let available = [extension("VK_KHR_surface"), extension("VK_KHR_xcb_surface")];

        assert!(is_extension_supported(&available, c"VK_KHR_surface"));
        assert!(is_extension_supported(&available, c"VK_KHR_xcb_surface"));
        assert!(!is_extension_supported(&available, c"VK_EXT_debug_utils"));
        assert!(!is_extension_supported(&[], c"VK_KHR_surface"));
    }

    #[test]
    fn extension_lookup_is_a_substring_match() {
        let available = [extension("VK_KHR_surface_protected_capabilities")];
        assert!(is_extension_supported(&available, c"VK_KHR_surface"));
    }

    #[test]
    fn layer_lookup_matches_advertised_names() {
        let available = [layer("VK_LAYER_KHRONOS_validation")];

        assert!(is_layer_supported(&available, c"VK_LAYER_KHRONOS_validation"));
        assert!(!is_layer_supported(&available, c"VK_LAYER_LUNARG_api_dump"));
    }

    #[test]
    fn queue_family_must_hold_every_desired_bit() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];

        assert_eq!(select_queue_family_index(&families, vk::QueueFlags::TRANSFER), Some(0));
        assert_eq!(select_queue_family_index(&families, vk::QueueFlags::COMPUTE), Some(1));
        assert_eq!(select_queue_family_index(&families, vk::QueueFlags::GRAPHICS), Some(2));
        assert_eq!(
            select_queue_family_index(&families, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            None
        );
    }

    #[test]
    fn queue_family_without_queues_is_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(select_queue_family_index(&families, vk::QueueFlags::GRAPHICS), Some(1));
    }

    #[test]
    fn present_family_is_first_supported_one() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::COMPUTE, 1),
        ];

        let picked = select_present_queue_family_index(&families, |index| Ok(index >= 1)).unwrap();
        assert_eq!(picked, Some(2));

        let none = select_present_queue_family_index(&families, |_| Ok(false)).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let result = select_present_queue_family_index(&families, |_| {
            Err(SetupError::Vk(vk::Result::ERROR_SURFACE_LOST_KHR).into())
        });
        assert!(result.is_err());
    }
}
