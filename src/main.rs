// =============================================================================
// VK-FRAMES DEMO - Textured quads through the frame coordinator
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, FPS title)                           │
// │    └── FrameCoordinator (N frame slots, fences, semaphores)     │
// │          ├── SwapchainManager (images, views, framebuffers)     │
// │          └── Scene (pipeline, mesh, texture, uniforms)          │
// │                └── VulkanDevice (instance, surface, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (FrameCoordinator::draw_frame):
// 1. Wait for this slot's previous frame
// 2. Acquire swapchain image (rebuild and skip if out of date)
// 3. Update the slot's uniform buffer
// 4. Record and submit
// 5. Present rendered image to screen
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use vk_frames::backend::image::find_depth_format;
use vk_frames::backend::{
    GraphicsPipeline, PipelineDesc, SwapchainManager, SwapchainOptions, SwapchainSupport,
    UploadContext, VulkanDevice,
};
use vk_frames::config::Config;
use vk_frames::render::{DrawFrameResult, FrameCoordinator, FrameRenderer, Scene, Vertex};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

type Frames = FrameCoordinator<VulkanDevice, Scene>;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vk-frames");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, {} frames in flight",
        config.graphics.present_mode,
        config.frames_in_flight()
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Level from config unless RUST_LOG is set
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(config.log_level());
    }
    builder.init();
}

// =============================================================================
// VULKAN SETUP
// =============================================================================

/// Build device, scene, swapchain and coordinator for `window`.
///
/// Every step that fails releases what the earlier steps created.
fn init_vulkan(config: &Config, window: &Window) -> Result<(Arc<VulkanDevice>, Frames)> {
    log::info!("Initializing Vulkan...");

    let device = VulkanDevice::new(&config.window.title, config.validation_enabled(), window)?;
    let gpu = &*device;

    // The render pass is compiled against the format the swapchain will pick
    let support = SwapchainSupport::query(gpu).context("Failed to query surface support")?;
    let surface_format = support.choose_surface_format()?;
    let depth_format = find_depth_format(gpu).context("No usable depth format")?;

    let desc = PipelineDesc {
        vertex_input: Vertex::input(),
        color_format: surface_format.format,
        depth_format,
        clear_color: config.graphics.clear_color,
    };
    let mut pipeline = GraphicsPipeline::load(
        gpu,
        &config.graphics.shader_dir,
        &config.graphics.shader_name,
        &desc,
    )
    .context("Failed to build graphics pipeline")?;

    let mut upload = match UploadContext::new(gpu) {
        Ok(upload) => upload,
        Err(err) => {
            pipeline.destroy(gpu)?;
            return Err(err).context("Failed to create upload context");
        }
    };
    let frames_in_flight = config.frames_in_flight();
    let scene = Scene::new(gpu, &upload, pipeline, frames_in_flight);
    // Uploads are synchronous; nothing needs the transient pool after this
    upload.destroy(gpu)?;
    let mut scene = scene.context("Failed to create scene")?;

    let size = window.inner_size();
    let options = SwapchainOptions {
        preferred_present_mode: config.present_mode(),
        depth_format,
        framebuffer_size: vk::Extent2D {
            width: size.width,
            height: size.height,
        },
    };
    let render_pass = scene.pipeline().render_pass();
    let swapchain = match SwapchainManager::new(device.clone(), render_pass, &support, options) {
        Ok(swapchain) => swapchain,
        Err(err) => {
            scene.destroy_frame_resources(gpu)?;
            scene.destroy_pipeline(gpu)?;
            return Err(err).context("Failed to create swapchain");
        }
    };

    let frames = FrameCoordinator::new(device.clone(), swapchain, scene, frames_in_flight)
        .context("Failed to create frame coordinator")?;

    log::info!("Vulkan initialized successfully!");
    Ok((device, frames))
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    /// Zero-area window: skip redraws until restored
    is_minimized: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN
    // ─────────────────────────────────────────────────────────────────────────
    // Frames is destroyed explicitly before the last device Arc drops
    frames: Option<Frames>,
    device: Option<Arc<VulkanDevice>>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            is_fullscreen,
            is_minimized: false,
            frames: None,
            device: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_minimized {
            return;
        }
        let Some(frames) = self.frames.as_mut() else {
            return;
        };

        match frames.draw_frame() {
            Ok(DrawFrameResult::Success) => self.update_fps(),
            Ok(DrawFrameResult::SwapchainOutOfDate) => {
                log::debug!("Frame skipped: swapchain out of date");
            }
            Err(e) => {
                // Device-level failures are not recoverable
                log::error!("Render error: {}", e);
                self.shutdown();
                event_loop.exit();
            }
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            // The Resized event that follows drives the swapchain rebuild
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    /// Drain the GPU, destroy every frame resource, then release the device
    fn shutdown(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            log::info!("Cleaning up Vulkan resources...");
            if let Err(e) = frames.wait_idle() {
                log::error!("Wait idle failed during shutdown: {}", e);
            }
            if let Err(e) = frames.destroy() {
                log::error!("Teardown failed: {}", e);
            }
            log::info!("Cleanup complete");
        }
        // Last Arc: VulkanDevice::drop destroys device, surface, instance
        self.device = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match init_vulkan(&self.config, &window) {
            Ok((device, frames)) => {
                self.device = Some(device);
                self.frames = Some(frames);
            }
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:#}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.is_minimized = size.width == 0 || size.height == 0;
                if let Some(frames) = self.frames.as_mut() {
                    frames.notify_resized(size.width, size.height);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
