// Setup errors
//
// Failure kinds raised while bringing Vulkan up. Call sites wrap these in
// anyhow with extra context; tests downcast to match on them.

use ash::vk;
use std::fmt;

use super::functions::Tier;

/// Which enumeration an extension was checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionScope {
    Instance,
    Device,
}

impl fmt::Display for ExtensionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionScope::Instance => write!(f, "an Instance object"),
            ExtensionScope::Device => write!(f, "a physical device"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    // Not chained as a source: the loading error already carries the OS text
    #[error("Could not connect with a Vulkan Runtime library ({name}): {cause}")]
    LoaderLibrary { name: String, cause: ash::LoadingError },

    #[error("Could not load {tier} Vulkan function named: {name}")]
    MissingFunction { tier: Tier, name: String },

    #[error("Could not get the number of {0}")]
    EmptyEnumeration(&'static str),

    #[error("Extension named '{name}' is not supported by {scope}")]
    ExtensionNotSupported { name: String, scope: ExtensionScope },

    #[error("Layer named '{0}' is not supported")]
    LayerNotSupported(String),

    #[error("No physical device satisfies: {0}")]
    NoSuitableDevice(&'static str),

    #[error("Window system is not supported: {0}")]
    UnsupportedWindowSystem(String),

    #[error("Swapchain image usage {0:?} is not supported by the surface")]
    UnsupportedImageUsage(vk::ImageUsageFlags),

    #[error("Vulkan: {0}")]
    Vk(#[from] vk::Result),
}
