// Backend module - hand-rolled Vulkan bring-up
//
// Design: Thin wrapper around ash raw tables, one owner per handle
// Lifetime: children hold an Arc to their parent, so teardown always runs
// swapchain -> device -> surface -> instance -> loader library

pub mod capabilities;
pub mod device;
pub mod error;
pub mod functions;
pub mod instance;
pub mod loader;
pub mod surface;
pub mod swapchain;

pub use device::{Queue, VulkanDevice};
pub use instance::{InstanceDesc, VulkanInstance};
pub use loader::VulkanLibrary;
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainDesc};
