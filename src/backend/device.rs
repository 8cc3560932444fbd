// Vulkan Device - logical device and its queues
//
// Responsibilities:
// - Device extension check
// - Logical device + queue creation
// - Device-level function check
// - Physical device selection for the two setups we support:
//   geometry shaders with graphics + compute queues, and presentation

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::capabilities::{
    check_available_device_extensions, check_available_queue_families, device_name,
    enumerate_available_physical_devices, get_features_and_properties, is_extension_supported,
    select_present_queue_family_index, select_queue_family_index,
};
use super::error::{ExtensionScope, SetupError};
use super::functions::{resolve_tier, Tier, DEVICE_LEVEL_FUNCTIONS};
use super::instance::VulkanInstance;
use super::surface::Surface;

/// Queues requested from one family
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub family_index: u32,
    pub priorities: Vec<f32>,
}

impl QueueInfo {
    pub fn single(family_index: u32) -> Self {
        Self {
            family_index,
            priorities: vec![1.0],
        }
    }
}

/// A queue handle together with the family it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

/// One queue per distinct family; the second family is dropped when shared
pub fn queue_infos_for(first_family: u32, second_family: u32) -> Vec<QueueInfo> {
    let mut requested = vec![QueueInfo::single(first_family)];
    if second_family != first_family {
        requested.push(QueueInfo::single(second_family));
    }
    requested
}

/// Missing device-level functions mean a broken loader, not a bad device
fn ends_search(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<SetupError>(),
        Some(SetupError::MissingFunction { .. })
    )
}

/// Try each candidate in turn and keep the first that qualifies.
///
/// `Ok(None)` and ordinary errors skip the candidate; only errors for which
/// `ends_search` holds stop the loop.
fn select_first<C, T, F>(candidates: impl IntoIterator<Item = C>, mut try_candidate: F) -> Result<Option<T>>
where
    F: FnMut(C) -> Result<Option<T>>,
{
    for candidate in candidates {
        match try_candidate(candidate) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => {}
            Err(e) if ends_search(&e) => return Err(e),
            Err(e) => log::warn!("{:#}", e),
        }
    }
    Ok(None)
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    enabled_extensions: Vec<CString>,
    instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    /// Create a logical device on `physical_device`
    ///
    /// Fails when any of `extensions` is not advertised by the device, when
    /// creation fails, or when a device-level function cannot be resolved.
    pub fn new(
        instance: Arc<VulkanInstance>,
        physical_device: vk::PhysicalDevice,
        queue_infos: &[QueueInfo],
        extensions: &[&CStr],
        features: &vk::PhysicalDeviceFeatures,
    ) -> Result<Self> {
        let available_extensions = check_available_device_extensions(instance.raw(), physical_device)?;

        for &extension in extensions {
            if !is_extension_supported(&available_extensions, extension) {
                log::warn!(
                    "Extension named '{}' is not supported by a physical device.",
                    extension.to_string_lossy()
                );
                return Err(SetupError::ExtensionNotSupported {
                    name: extension.to_string_lossy().into_owned(),
                    scope: ExtensionScope::Device,
                }
                .into());
            }
        }

        let queue_create_infos: Vec<_> = queue_infos
            .iter()
            .map(|info| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(info.family_index)
                    .queue_priorities(&info.priorities)
                    .build()
            })
            .collect();

        let extension_names: Vec<_> = extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(features);

        let device = unsafe { instance.raw().create_device(physical_device, &create_info, None) }
            .map_err(SetupError::Vk)
            .context("Could not create logical device")?;

        let properties = unsafe { instance.raw().get_physical_device_properties(physical_device) };
        log::info!("Created logical device on {}", device_name(&properties));

        let device = Self {
            device,
            physical_device,
            properties,
            enabled_extensions: extensions.iter().map(|&e| e.to_owned()).collect(),
            instance,
        };
        device.load_device_level_functions()?;

        Ok(device)
    }

    /// Check every device-level function through vkGetDeviceProcAddr
    pub fn load_device_level_functions(&self) -> Result<usize, SetupError> {
        let get_device_proc_addr = self.instance.raw().fp_v1_0().get_device_proc_addr;
        let handle = self.device.handle();
        let enabled: Vec<&CStr> = self.enabled_extensions.iter().map(|e| e.as_c_str()).collect();

        resolve_tier(Tier::Device, DEVICE_LEVEL_FUNCTIONS, &enabled, |name| unsafe {
            get_device_proc_addr(handle, name.as_ptr()).is_some()
        })
    }

    pub fn get_device_queue(&self, family_index: u32, queue_index: u32) -> Queue {
        let handle = unsafe { self.device.get_device_queue(family_index, queue_index) };
        Queue { family_index, handle }
    }

    /// Pick the first device with geometry shaders plus graphics and compute
    /// queues. Returns the device with its graphics and compute queues.
    pub fn create_with_geometry_shaders_and_graphics_and_compute_queues(
        instance: &Arc<VulkanInstance>,
    ) -> Result<(Self, Queue, Queue)> {
        let physical_devices = enumerate_available_physical_devices(instance.raw())?;

        select_first(physical_devices, |physical_device| {
            Self::try_geometry_graphics_compute(instance, physical_device)
        })?
        .ok_or_else(|| SetupError::NoSuitableDevice("geometry shaders with graphics and compute queues").into())
    }

    fn try_geometry_graphics_compute(
        instance: &Arc<VulkanInstance>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<(Self, Queue, Queue)>> {
        let (features, properties) = get_features_and_properties(instance.raw(), physical_device);
        let name = device_name(&properties);

        if features.geometry_shader != vk::TRUE {
            log::info!("Skipping {}: no geometry shader support", name);
            return Ok(None);
        }
        let features = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            ..Default::default()
        };

        let families = check_available_queue_families(instance.raw(), physical_device)
            .with_context(|| format!("Skipping {}", name))?;
        let Some(graphics_family) = select_queue_family_index(&families, vk::QueueFlags::GRAPHICS) else {
            log::info!("Skipping {}: no graphics queue family", name);
            return Ok(None);
        };
        let Some(compute_family) = select_queue_family_index(&families, vk::QueueFlags::COMPUTE) else {
            log::info!("Skipping {}: no compute queue family", name);
            return Ok(None);
        };

        let requested = queue_infos_for(graphics_family, compute_family);
        let device = Self::new(instance.clone(), physical_device, &requested, &[], &features)
            .with_context(|| format!("Skipping {}", name))?;

        let graphics = device.get_device_queue(graphics_family, 0);
        let compute = device.get_device_queue(compute_family, 0);
        Ok(Some((device, graphics, compute)))
    }

    /// Pick the first device that can render to and present on `surface`.
    /// Returns the device with its graphics and present queues.
    pub fn create_for_presentation(
        instance: &Arc<VulkanInstance>,
        surface: &Surface,
    ) -> Result<(Self, Queue, Queue)> {
        let physical_devices = enumerate_available_physical_devices(instance.raw())?;

        select_first(physical_devices, |physical_device| {
            Self::try_graphics_present(instance, surface, physical_device)
        })?
        .ok_or_else(|| SetupError::NoSuitableDevice("graphics and present queues with VK_KHR_swapchain").into())
    }

    fn try_graphics_present(
        instance: &Arc<VulkanInstance>,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<(Self, Queue, Queue)>> {
        let (_, properties) = get_features_and_properties(instance.raw(), physical_device);
        let name = device_name(&properties);

        let families = check_available_queue_families(instance.raw(), physical_device)
            .with_context(|| format!("Skipping {}", name))?;
        let Some(graphics_family) = select_queue_family_index(&families, vk::QueueFlags::GRAPHICS) else {
            log::info!("Skipping {}: no graphics queue family", name);
            return Ok(None);
        };
        let present_family = select_present_queue_family_index(&families, |index| {
            surface.supports_present(physical_device, index)
        })
        .with_context(|| format!("Skipping {}", name))?;
        let Some(present_family) = present_family else {
            log::info!("Skipping {}: no queue family can present to the surface", name);
            return Ok(None);
        };

        let requested = queue_infos_for(graphics_family, present_family);
        let extensions = [khr::Swapchain::name()];
        let features = vk::PhysicalDeviceFeatures::default();
        let device = Self::new(instance.clone(), physical_device, &requested, &extensions, &features)
            .with_context(|| format!("Skipping {}", name))?;

        let graphics = device.get_device_queue(graphics_family, 0);
        let present = device.get_device_queue(present_family, 0);
        Ok(Some((device, graphics, present)))
    }

    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(SetupError::Vk)?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("Device did not go idle before destruction: {:#}", e);
        }

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_device_is_skipped() {
        let picked = select_first(["lost-surface", "presents"], |name| {
            if name == "lost-surface" {
                Err(anyhow::Error::from(SetupError::Vk(vk::Result::ERROR_SURFACE_LOST_KHR))
                    .context("Skipping lost-surface"))
            } else {
                Ok(Some(name))
            }
        })
        .unwrap();
        assert_eq!(picked, Some("presents"));
    }

    #[test]
    fn missing_device_function_ends_the_search() {
        let mut tried = Vec::new();
        let err = select_first([0, 1], |index| {
            tried.push(index);
            Err::<Option<()>, _>(
                anyhow::Error::from(SetupError::MissingFunction {
                    tier: Tier::Device,
                    name: "vkGetDeviceQueue".to_string(),
                })
                .context("Skipping GPU 0"),
            )
        })
        .unwrap_err();

        assert_eq!(tried, [0]);
        assert!(ends_search(&err));
    }

    #[test]
    fn no_qualifying_device_gives_none() {
        let picked = select_first([0, 1, 2], |_| Ok::<Option<u32>, _>(None)).unwrap();
        assert!(picked.is_none());
    }

    #[test]
    fn shared_family_gets_one_queue_request() {
        assert_eq!(queue_infos_for(0, 0), vec![QueueInfo::single(0)]);
    }

    #[test]
    fn distinct_families_each_get_a_queue() {
        let requested = queue_infos_for(0, 2);
        assert_eq!(requested.len(), 2);
        assert_eq!(requested[0].family_index, 0);
        assert_eq!(requested[1].family_index, 2);
        assert!(requested.iter().all(|info| info.priorities == [1.0]));
    }
}
