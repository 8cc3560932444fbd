// =============================================================================
// VULKAN BRING-UP - Initializing Vulkan by hand, one tier at a time
// =============================================================================
//
// Every step is a thin call into the driver plus result checking and
// logging. Nothing is rendered; setup stops at the swapchain image count.
//
// SETUP FLOW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Loader library (libvulkan / vulkan-1.dll)                      │
// │    └── Global functions (extensions, layers, vkCreateInstance)  │
// │          └── Instance (+ instance-level functions)              │
// │                └── Physical devices -> queue families           │
// │                      └── Logical device (+ device functions)    │
// │                            └── Surface -> Swapchain (windowed)  │
// └─────────────────────────────────────────────────────────────────┘
//
// Teardown runs the same chain bottom-up.
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use backend::capabilities::{
    check_available_instance_extensions, check_available_instance_layers,
    describe_physical_device, enumerate_available_physical_devices, extension_name, layer_name,
};
use backend::{Queue, Surface, Swapchain, SwapchainDesc, VulkanDevice, VulkanInstance, VulkanLibrary};
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// COMMAND LINE
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "vk-init")]
#[command(about = "Bring up a Vulkan instance, device and swapchain by hand.", long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log at debug level (every resolved function, every extension)
    #[arg(short, long)]
    verbose: bool,

    /// Enable VK_LAYER_KHRONOS_validation and the debug messenger
    #[arg(long)]
    validation: bool,

    /// Skip the window, surface and swapchain
    #[arg(long)]
    headless: bool,
}

impl Args {
    /// Flags only ever switch things on; config values stay otherwise
    fn apply(&self, config: &mut Config) {
        config.debug.verbose |= self.verbose;
        config.debug.validation_layers |= self.validation;
        config.window.headless |= self.headless;
    }
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration, then let the command line override it
    let (mut config, load_error) = Config::load(&args.config);
    args.apply(&mut config);

    init_logging(&config);
    if let Some(e) = load_error {
        log::warn!("Failed to load {:?}: {:#}. Using defaults.", args.config, e);
    }
    log::info!("Starting Vulkan bring-up");
    log::info!(
        "Mode: {}, validation: {}",
        if config.window.headless { "headless" } else { "windowed" },
        config.debug.validation_layers
    );

    if config.window.headless {
        return run_headless(&config);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if config.debug.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::from_default_env().filter_level(level).init();
}

// =============================================================================
// SHARED STEPS
// =============================================================================

/// Open the loader library and check the global-level functions
fn connect(config: &Config) -> Result<Arc<VulkanLibrary>> {
    let library = match config.loader.library.as_deref() {
        Some(name) => VulkanLibrary::connect_to(name)?,
        None => VulkanLibrary::connect()?,
    };
    library.load_global_level_functions()?;

    let version = library.instance_version();
    log::info!(
        "Connected with {} (instance version {}.{}.{})",
        library.name(),
        ash::vk::api_version_major(version),
        ash::vk::api_version_minor(version),
        ash::vk::api_version_patch(version)
    );

    Ok(Arc::new(library))
}

/// Log what the loader offers before anything is created
fn report_instance_capabilities(library: &VulkanLibrary) -> Result<()> {
    let extensions = check_available_instance_extensions(library.entry())?;
    log::info!("{} instance extensions available", extensions.len());
    for extension in &extensions {
        log::info!("  {}", extension_name(extension).to_string_lossy());
    }

    let layers = check_available_instance_layers(library.entry())?;
    log::info!("{} instance layers available", layers.len());
    for layer in &layers {
        log::info!("  {}", layer_name(layer).to_string_lossy());
    }

    Ok(())
}

fn log_queue(label: &str, queue: &Queue) {
    log::info!("{} queue: family {} ({:?})", label, queue.family_index, queue.handle);
}

// =============================================================================
// HEADLESS
// =============================================================================

/// Instance, device enumeration and a geometry/graphics/compute device
fn run_headless(config: &Config) -> Result<()> {
    let library = connect(config)?;
    report_instance_capabilities(&library)?;

    let desc = config.instance_desc()?;
    let instance = VulkanInstance::new(library, &desc)?;

    for physical_device in enumerate_available_physical_devices(instance.raw())? {
        describe_physical_device(instance.raw(), physical_device)?;
    }

    let (device, graphics, compute) =
        VulkanDevice::create_with_geometry_shaders_and_graphics_and_compute_queues(&instance)?;
    log::info!(
        "Selected GPU: {}",
        backend::capabilities::device_name(&device.properties)
    );
    log_queue("Graphics", &graphics);
    log_queue("Compute", &compute);

    // Reverse order of creation
    drop(device);
    drop(instance);

    log::info!("Headless setup complete");
    Ok(())
}

// =============================================================================
// WINDOWED
// =============================================================================

/// Windowed setup state.
///
/// Field order follows teardown order. Each owner also keeps its parent
/// alive through an Arc, so dropping out of order cannot free a parent early.
pub struct App {
    config: Config,
    swapchain: Option<Swapchain>,
    device: Option<Arc<VulkanDevice>>,
    surface: Option<Arc<Surface>>,
    instance: Option<Arc<VulkanInstance>>,
    window: Option<Arc<Window>>,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            swapchain: None,
            device: None,
            surface: None,
            instance: None,
            window: None,
            error: None,
        }
    }

    /// Initialize everything down to the swapchain.
    ///
    /// 1. Instance with WSI extensions for this window system
    /// 2. Surface
    /// 3. Device with graphics + present queues
    /// 4. Swapchain
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        log::info!("Initializing Vulkan...");

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Loader + instance
        // ─────────────────────────────────────────────────────────────────────
        let library = connect(&self.config)?;
        report_instance_capabilities(&library)?;

        let desc = self.config.instance_desc()?;
        let instance = VulkanInstance::with_wsi_extensions(library, &desc, display_handle)?;
        self.instance = Some(instance.clone());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface (platform-specific window connection)
        // ─────────────────────────────────────────────────────────────────────
        let surface = Arc::new(Surface::new(instance.clone(), display_handle, window_handle)?);
        self.surface = Some(surface.clone());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Device that can present to the surface
        // ─────────────────────────────────────────────────────────────────────
        let (device, graphics, present) = VulkanDevice::create_for_presentation(&instance, &surface)?;
        log::info!(
            "Selected GPU: {}",
            backend::capabilities::device_name(&device.properties)
        );
        log_queue("Graphics", &graphics);
        log_queue("Present", &present);

        let device = Arc::new(device);
        self.device = Some(device.clone());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            log::info!("Window is minimized, skipping swapchain creation");
            return Ok(());
        }

        let swapchain_desc = SwapchainDesc::new(size.width, size.height, self.config.get_present_mode());
        let swapchain = Swapchain::new(device, surface, &swapchain_desc)?;
        log::info!(
            "Swapchain ready: {} images, {}x{}, {:?}, {:?}",
            swapchain.image_count(),
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format.format,
            swapchain.present_mode
        );
        self.swapchain = Some(swapchain);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        // Held before init so a half-built setup never outlives its window
        self.window = Some(window.clone());

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:#}", e);
            self.error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Destroy in reverse order of creation
        self.swapchain = None;
        self.device = None;
        self.surface = None;
        self.instance = None;

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_off() {
        let args = Args::try_parse_from(["vk-init"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert!(!args.verbose && !args.validation && !args.headless);
    }

    #[test]
    fn flags_switch_config_on() {
        let args = Args::try_parse_from(["vk-init", "-v", "--validation", "--headless", "-c", "bring-up.toml"])
            .unwrap();
        assert_eq!(args.config, PathBuf::from("bring-up.toml"));

        let mut config = Config::default();
        args.apply(&mut config);
        assert!(config.debug.verbose);
        assert!(config.debug.validation_layers);
        assert!(config.window.headless);
    }

    #[test]
    fn absent_flags_keep_config_values() {
        let args = Args::try_parse_from(["vk-init"]).unwrap();
        let mut config = Config::default();
        config.debug.validation_layers = true;
        args.apply(&mut config);
        assert!(config.debug.validation_layers);
        assert!(!config.window.headless);
    }

    #[test]
    #[ignore = "needs a Vulkan driver with a geometry-shader capable GPU"]
    fn headless_setup_runs_against_driver() {
        let mut config = Config::default();
        config.window.headless = true;
        run_headless(&config).unwrap();
    }

    #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
    #[test]
    #[ignore = "needs an X11 display"]
    fn failed_setup_keeps_the_window_alive() {
        use std::time::Duration;
        use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
        use winit::platform::x11::EventLoopBuilderExtX11;

        let mut event_loop = EventLoop::builder().with_any_thread(true).build().unwrap();
        let mut config = Config::default();
        config.instance.layers.push("VK_LAYER_vk_init_missing".to_string());
        let mut app = App::new(config);

        for _ in 0..100 {
            if let PumpStatus::Exit(_) = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut app) {
                break;
            }
        }

        assert!(app.error.is_some());
        assert!(app.window.is_some());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["vk-init", "--render"]).is_err());
    }
}
