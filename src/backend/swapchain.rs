// Swapchain - Window presentation
//
// Manages the chain of images backing the window surface. Setup only:
// query what the surface allows, pick settings, create the swapchain and
// report how many images the driver gave us.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::error::SetupError;
use super::surface::Surface;
use super::VulkanDevice;

/// What the application would like from the swapchain
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub present_mode: vk::PresentModeKHR,
    pub image_usage: vk::ImageUsageFlags,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32, present_mode: vk::PresentModeKHR) -> Self {
        Self {
            width,
            height,
            present_mode,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        }
    }
}

/// One more than the minimum, clamped to the maximum (0 means no limit)
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

/// Prefer SRGB; a lone UNDEFINED entry means the surface takes anything
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return Some(preferred);
    }

    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

/// The desired mode if offered, else MAILBOX, else FIFO (always supported)
pub fn select_present_mode(modes: &[vk::PresentModeKHR], desired: vk::PresentModeKHR) -> vk::PresentModeKHR {
    [desired, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn select_image_usage(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::ImageUsageFlags,
) -> Result<vk::ImageUsageFlags, SetupError> {
    if caps.supported_usage_flags.contains(desired) {
        Ok(desired)
    } else {
        Err(SetupError::UnsupportedImageUsage(desired & !caps.supported_usage_flags))
    }
}

pub fn select_transform(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::SurfaceTransformFlagsKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if caps.supported_transforms.contains(desired) {
        desired
    } else {
        caps.current_transform
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, surface: Arc<Surface>, desc: &SwapchainDesc) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", desc.width, desc.height);

        let loader = &surface.surface_loader;
        let physical_device = device.physical_device;

        // Query surface capabilities
        let surface_caps = unsafe {
            loader.get_physical_device_surface_capabilities(physical_device, surface.surface)
        }
        .map_err(SetupError::Vk)
        .context("Could not get the capabilities of a presentation surface")?;

        // Query supported formats
        let formats = unsafe { loader.get_physical_device_surface_formats(physical_device, surface.surface) }
            .map_err(SetupError::Vk)?;
        if formats.is_empty() {
            return Err(SetupError::EmptyEnumeration("supported surface formats").into());
        }

        // Query supported present modes
        let present_modes = unsafe {
            loader.get_physical_device_surface_present_modes(physical_device, surface.surface)
        }
        .map_err(SetupError::Vk)?;
        if present_modes.is_empty() {
            return Err(SetupError::EmptyEnumeration("supported present modes").into());
        }

        let format = select_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = select_present_mode(&present_modes, desc.present_mode);
        let extent = select_extent(&surface_caps, desc.width, desc.height);
        let image_count = select_image_count(&surface_caps);
        let image_usage = select_image_usage(&surface_caps, desc.image_usage)?;
        let transform = select_transform(&surface_caps, desc.transform);

        log::info!("Present mode: {:?}", present_mode);
        log::info!(
            "Surface format: {:?} / {:?}, extent {}x{}, requesting {} images",
            format.format,
            format.color_space,
            extent.width,
            extent.height,
            image_count
        );

        let swapchain_loader = khr::Swapchain::new(device.instance().raw(), &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(SetupError::Vk)
            .context("Could not create a swapchain")?;

        // Get swapchain images
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(SetupError::EmptyEnumeration("swapchain images").into());
            }
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(SetupError::Vk(e)).context("Could not enumerate swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            format,
            present_mode,
            extent,
            device,
            _surface: surface,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::info!("Destroying swapchain...");
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before swapchain destruction: {:#}", e);
        }
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_one_above_minimum() {
        assert_eq!(select_image_count(&caps(2, 8)), 3);
        assert_eq!(select_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(select_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(select_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(select_surface_format(&formats[..1]).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn undefined_format_means_free_choice() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(select_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn present_mode_falls_back_to_mailbox_then_fifo() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(select_present_mode(&all, vk::PresentModeKHR::IMMEDIATE), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(
            select_present_mode(&all[..2], vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&all[..1], vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let mut fixed = caps(2, 0);
        fixed.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(select_extent(&fixed, 1920, 1080), vk::Extent2D { width: 800, height: 600 });

        let free = caps(2, 0);
        assert_eq!(select_extent(&free, 1280, 4000), vk::Extent2D { width: 1280, height: 2048 });
        assert_eq!(select_extent(&free, 0, 0), vk::Extent2D { width: 1, height: 1 });
    }

    #[test]
    fn unsupported_usage_is_reported() {
        let caps = caps(2, 0);
        assert!(select_image_usage(&caps, vk::ImageUsageFlags::COLOR_ATTACHMENT).is_ok());

        let err = select_image_usage(&caps, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .unwrap_err();
        assert!(matches!(err, SetupError::UnsupportedImageUsage(flags) if flags == vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn transform_falls_back_to_current() {
        let caps = caps(2, 0);
        assert_eq!(
            select_transform(&caps, vk::SurfaceTransformFlagsKHR::ROTATE_90),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );
    }
}
