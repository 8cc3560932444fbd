// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// Command line flags are applied on top by main.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::ffi::CString;
use std::path::Path;

use crate::backend::InstanceDesc;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub application: ApplicationConfig,
    pub loader: LoaderConfig,
    pub instance: InstanceConfig,
    pub window: WindowConfig,
    pub swapchain: SwapchainConfig,
    pub debug: DebugConfig,
}

/// Names and API version reported to the driver
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub engine_name: String,
    pub api_version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Vulkan bring-up".to_string(),
            engine_name: "vk-init".to_string(),
            api_version: "1.0".to_string(),
        }
    }
}

/// Loader library override; the platform default is used when unset
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoaderConfig {
    pub library: Option<String>,
}

/// Extra instance extensions and layers to request
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InstanceConfig {
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub headless: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan bring-up".to_string(),
            width: 1280,
            height: 720,
            headless: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub present_mode: String,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub verbose: bool,
}

impl Config {
    /// Load configuration from file, falling back to defaults on errors.
    ///
    /// The error is handed back instead of logged, since this runs before
    /// the logger is set up.
    pub fn load<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.swapchain.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.swapchain.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Get API version as a packed Vulkan version number
    pub fn get_api_version(&self) -> u32 {
        match self.application.api_version.trim() {
            "1.0" => vk::API_VERSION_1_0,
            "1.1" => vk::API_VERSION_1_1,
            "1.2" => vk::API_VERSION_1_2,
            "1.3" => vk::API_VERSION_1_3,
            other => {
                log::warn!("Unknown API version '{}', defaulting to 1.0", other);
                vk::API_VERSION_1_0
            }
        }
    }

    /// Instance request built from the [application] and [instance] sections
    pub fn instance_desc(&self) -> Result<InstanceDesc> {
        let mut desc = InstanceDesc::new(&self.application.name);
        desc.engine_name = self.application.engine_name.clone();
        desc.api_version = self.get_api_version();

        for extension in &self.instance.extensions {
            let name = CString::new(extension.as_str())
                .with_context(|| format!("Invalid extension name: {:?}", extension))?;
            desc.require_extension(&name);
        }
        for layer in &self.instance.layers {
            let name = CString::new(layer.as_str())
                .with_context(|| format!("Invalid layer name: {:?}", layer))?;
            desc.require_layer(&name);
        }
        if self.debug.validation_layers {
            desc.enable_validation();
        }

        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert!(!config.window.headless);
        assert!(!config.debug.validation_layers);
        assert!(config.loader.library.is_none());
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.get_api_version(), vk::API_VERSION_1_0);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [application]
            name = "Probe"
            api_version = "1.2"

            [loader]
            library = "/opt/vulkan/libvulkan.so.1"

            [instance]
            extensions = ["VK_KHR_get_physical_device_properties2"]

            [window]
            headless = true

            [swapchain]
            present_mode = "FIFO_RELAXED"
            "#,
        )
        .unwrap();

        assert_eq!(config.application.name, "Probe");
        assert_eq!(config.application.engine_name, "vk-init");
        assert_eq!(config.get_api_version(), vk::API_VERSION_1_2);
        assert_eq!(config.loader.library.as_deref(), Some("/opt/vulkan/libvulkan.so.1"));
        assert!(config.window.headless);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
    }

    #[test]
    fn unknown_values_fall_back() {
        let config = Config::parse(
            r#"
            [application]
            api_version = "9.9"
            [swapchain]
            present_mode = "vsync-ish"
            "#,
        )
        .unwrap();
        assert_eq!(config.get_api_version(), vk::API_VERSION_1_0);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window\nwidth = 3").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "Vulkan bring-up");
    }

    #[test]
    fn malformed_file_falls_back_with_error() {
        let path = std::env::temp_dir().join(format!("vk-init-malformed-{}.toml", std::process::id()));
        std::fs::write(&path, "[window\nwidth = 3").unwrap();

        let (config, error) = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        let error = error.expect("a malformed file must report its error");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
        assert_eq!(config.window.width, 1280);
        assert!(!config.window.headless);
    }

    #[test]
    fn missing_file_loads_without_error() {
        let (config, error) = Config::load("does/not/exist/config.toml");
        assert!(error.is_none());
        assert_eq!(config.application.name, "Vulkan bring-up");
    }

    #[test]
    fn instance_desc_carries_requested_names() {
        let mut config = Config::parse(
            r#"
            [instance]
            extensions = ["VK_KHR_surface", "VK_KHR_surface"]
            layers = ["VK_LAYER_LUNARG_api_dump"]
            "#,
        )
        .unwrap();
        config.debug.validation_layers = true;

        let desc = config.instance_desc().unwrap();
        assert_eq!(desc.extensions.len(), 2);
        assert_eq!(desc.layers.len(), 2);
        assert_eq!(desc.engine_name, "vk-init");
    }

    #[test]
    fn interior_nul_is_rejected() {
        let mut config = Config::default();
        config.instance.extensions.push("VK_\0bad".to_string());
        assert!(config.instance_desc().is_err());
    }
}
