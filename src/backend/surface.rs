// Presentation surface - window system connection
//
// Each window system needs VK_KHR_surface plus its own platform extension,
// and its own create call. Handles come from raw-window-handle so any
// windowing crate can supply them.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

use super::error::SetupError;
use super::instance::VulkanInstance;

/// Instance extensions needed to create a surface for `display`
pub fn required_surface_extensions(display: RawDisplayHandle) -> Result<[&'static CStr; 2], SetupError> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => return Err(SetupError::UnsupportedWindowSystem(format!("{:?}", other))),
    };
    Ok([khr::Surface::name(), platform])
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let entry = instance.entry();
        let raw = instance.raw();

        let surface = unsafe {
            match (display, window) {
                (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                    let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
                    let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                    let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                        .hinstance(hinstance)
                        .hwnd(hwnd);
                    khr::Win32Surface::new(entry, raw).create_win32_surface(&create_info, None)
                }
                (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
                    let dpy = display
                        .display
                        .context("Xlib display handle is missing its connection")?
                        .as_ptr();
                    let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(dpy as *mut _)
                        .window(window.window);
                    khr::XlibSurface::new(entry, raw).create_xlib_surface(&create_info, None)
                }
                (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
                    let connection = display
                        .connection
                        .context("XCB display handle is missing its connection")?
                        .as_ptr();
                    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection as *mut _)
                        .window(window.window.get());
                    khr::XcbSurface::new(entry, raw).create_xcb_surface(&create_info, None)
                }
                (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                    let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display.display.as_ptr())
                        .surface(window.surface.as_ptr());
                    khr::WaylandSurface::new(entry, raw).create_wayland_surface(&create_info, None)
                }
                (display, window) => {
                    return Err(SetupError::UnsupportedWindowSystem(format!("{:?} / {:?}", display, window)).into());
                }
            }
        }
        .map_err(SetupError::Vk)
        .context("Could not create presentation surface")?;

        log::info!("Created presentation surface");

        let surface_loader = khr::Surface::new(entry, raw);

        Ok(Self {
            surface,
            surface_loader,
            _instance: instance,
        })
    }

    /// Whether queue family `family_index` of `physical_device` can present here
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family_index: u32) -> Result<bool> {
        let supported = unsafe {
            self.surface_loader
                .get_physical_device_surface_support(physical_device, family_index, self.surface)
        }
        .map_err(SetupError::Vk)?;
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::info!("Destroying presentation surface...");
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        AndroidDisplayHandle, WindowsDisplayHandle, XcbDisplayHandle, XlibDisplayHandle,
    };

    #[test]
    fn each_window_system_maps_to_its_extension() {
        let xlib = required_surface_extensions(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0))).unwrap();
        assert_eq!(xlib, [c"VK_KHR_surface", c"VK_KHR_xlib_surface"]);

        let xcb = required_surface_extensions(RawDisplayHandle::Xcb(XcbDisplayHandle::new(None, 0))).unwrap();
        assert_eq!(xcb[1], c"VK_KHR_xcb_surface");

        let win32 = required_surface_extensions(RawDisplayHandle::Windows(WindowsDisplayHandle::new())).unwrap();
        assert_eq!(win32[1], c"VK_KHR_win32_surface");
    }

    #[test]
    fn unknown_window_system_is_rejected() {
        let err = required_surface_extensions(RawDisplayHandle::Android(AndroidDisplayHandle::new())).unwrap_err();
        assert!(matches!(err, SetupError::UnsupportedWindowSystem(_)));
    }
}
