// Loader library - runtime connection to the Vulkan driver
//
// Opens the platform's loader library by name, pulls the exported
// vkGetInstanceProcAddr out of it and verifies the global-level functions.
// The library stays open for as long as anything holds the VulkanLibrary.

use ash::{vk, Entry};

use super::error::SetupError;
use super::functions::{resolve_tier, Tier, EXPORTED_FUNCTIONS, GLOBAL_LEVEL_FUNCTIONS};

#[cfg(target_os = "windows")]
pub const LOADER_LIBRARY_NAME: &str = "vulkan-1.dll";

#[cfg(target_os = "android")]
pub const LOADER_LIBRARY_NAME: &str = "libvulkan.so";

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const LOADER_LIBRARY_NAME: &str = "libvulkan.1.dylib";

#[cfg(all(
    unix,
    not(any(target_os = "macos", target_os = "ios", target_os = "android"))
))]
pub const LOADER_LIBRARY_NAME: &str = "libvulkan.so.1";

pub struct VulkanLibrary {
    entry: Entry,
    name: String,
}

impl VulkanLibrary {
    /// Connect with the loader under its usual platform name
    pub fn connect() -> Result<Self, SetupError> {
        Self::connect_to(LOADER_LIBRARY_NAME)
    }

    /// Connect with a loader library at `name` (file name or path)
    pub fn connect_to(name: &str) -> Result<Self, SetupError> {
        log::info!("Connecting with Vulkan loader library: {}", name);

        let entry = unsafe { Entry::load_from(name) }.map_err(|err| match err {
            ash::LoadingError::MissingEntryPoint(_) => {
                let function = EXPORTED_FUNCTIONS[0].name.to_string_lossy();
                log::error!("Could not load exported Vulkan function named: {}", function);
                SetupError::MissingFunction {
                    tier: Tier::Exported,
                    name: function.into_owned(),
                }
            }
            cause => {
                log::error!("Could not connect with a Vulkan Runtime library: {}", cause);
                SetupError::LoaderLibrary {
                    name: name.to_owned(),
                    cause,
                }
            }
        })?;

        for function in EXPORTED_FUNCTIONS {
            log::debug!("Loaded exported function {}", function.name.to_string_lossy());
        }

        Ok(Self {
            entry,
            name: name.to_owned(),
        })
    }

    /// Check every global-level function through vkGetInstanceProcAddr(NULL, ..)
    pub fn load_global_level_functions(&self) -> Result<usize, SetupError> {
        let get_instance_proc_addr = self.entry.static_fn().get_instance_proc_addr;

        resolve_tier(Tier::Global, GLOBAL_LEVEL_FUNCTIONS, &[], |name| unsafe {
            get_instance_proc_addr(vk::Instance::null(), name.as_ptr()).is_some()
        })
    }

    /// Highest instance API version the loader supports (1.0 loaders lack the query)
    pub fn instance_version(&self) -> u32 {
        match self.entry.try_enumerate_instance_version() {
            Ok(Some(version)) => version,
            Ok(None) => vk::API_VERSION_1_0,
            Err(e) => {
                log::warn!("Could not query instance version: {:?}", e);
                vk::API_VERSION_1_0
            }
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for VulkanLibrary {
    fn drop(&mut self) {
        log::info!("Releasing Vulkan loader library: {}", self.name);
    }
}
