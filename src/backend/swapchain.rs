// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A SwapchainGeneration is one surface configuration: swapchain, views,
// depth attachment and framebuffers. Generations are replaced whole: the old
// one is destroyed after the device is idle, then a new one is built from the
// current surface capabilities. A failed build leaves no generation at all.
//
// States:
//   Uninitialized -> Ready <-> Rebuilding -> Ready
//                           \-> Suspended (zero-area surface or failed build)
//   any -> TornDown

use crate::backend::gpu::Gpu;
use crate::backend::image::{create_view, DepthImage};
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────
// Surface support and selection policy
// ─────────────────────────────────────────────────────────────────────────

/// Snapshot of what the surface supports
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query<G: Gpu>(gpu: &G) -> Result<Self> {
        let capabilities = gpu
            .surface_capabilities()
            .map_err(surface_query_error)?;
        let formats = gpu.surface_formats().map_err(surface_query_error)?;
        let present_modes = gpu.surface_present_modes().map_err(surface_query_error)?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Prefer BGRA8 sRGB with a nonlinear sRGB color space, else the first format
    pub fn choose_surface_format(&self) -> Result<vk::SurfaceFormatKHR> {
        self.formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| self.formats.first())
            .copied()
            .ok_or(RenderError::SurfaceLost)
    }

    // MAILBOX: No vsync, no tearing, triple buffered
    // IMMEDIATE: No vsync, lowest latency, may tear
    // FIFO: Vsync enabled, guaranteed available
    pub fn choose_present_mode(&self, preferred: vk::PresentModeKHR) -> Result<vk::PresentModeKHR> {
        if self.present_modes.is_empty() {
            return Err(RenderError::SurfaceLost);
        }
        if self.present_modes.contains(&preferred) {
            Ok(preferred)
        } else {
            Ok(vk::PresentModeKHR::FIFO)
        }
    }

    /// Current extent if the surface defines one, else the framebuffer size
    /// clamped into the supported range. Zero area means minimized.
    pub fn choose_extent(&self, framebuffer_size: vk::Extent2D) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }
        if framebuffer_size.width == 0 || framebuffer_size.height == 0 {
            return vk::Extent2D {
                width: 0,
                height: 0,
            };
        }
        vk::Extent2D {
            width: framebuffer_size
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer_size
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    /// One more than the minimum, capped by the maximum (0 means no cap)
    pub fn image_count(&self) -> u32 {
        let caps = &self.capabilities;
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }
        image_count
    }
}

fn surface_query_error(result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
        other => RenderError::Device {
            operation: "surface query",
            result: other,
        },
    }
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

// ─────────────────────────────────────────────────────────────────────────
// Public status types
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SwapchainOptions {
    pub preferred_present_mode: vk::PresentModeKHR,
    pub depth_format: vk::Format,
    /// Platform framebuffer size, used when the surface leaves extent undefined
    pub framebuffer_size: vk::Extent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Uninitialized,
    Ready,
    Rebuilding,
    /// No generation: the surface has zero area or the last build failed
    Suspended,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Ready(u32),
    /// Usable this frame, but a rebuild should follow
    Suboptimal(u32),
    /// The index must not be used; rebuild first
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Success,
    Suboptimal,
    OutOfDate,
}

// ─────────────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────────────

struct SwapchainGeneration {
    id: u64,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<DepthImage>,
    framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl SwapchainGeneration {
    /// Also used on partially built generations
    fn destroy<G: Gpu>(mut self, gpu: &G) -> Result<()> {
        for framebuffer in self.framebuffers.drain(..) {
            gpu.destroy_framebuffer(framebuffer);
        }
        if let Some(mut depth) = self.depth.take() {
            depth.destroy(gpu)?;
        }
        for view in self.views.drain(..) {
            gpu.destroy_image_view(view);
        }
        // Images belong to the swapchain
        gpu.destroy_swapchain(self.swapchain);
        Ok(())
    }

    fn fill<G: Gpu>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<()> {
        self.images = gpu
            .swapchain_images(self.swapchain)
            .map_err(RenderError::creation("swapchain images"))?;

        for &image in &self.images {
            let view = create_view(
                gpu,
                image,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
                "swapchain image view",
            )?;
            self.views.push(view);
        }

        let depth = DepthImage::new(gpu, self.extent, depth_format)?;
        let depth_view = depth.view();
        self.depth = Some(depth);

        for &view in &self.views {
            let attachments = [view, depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = gpu
                .create_framebuffer(&framebuffer_info)
                .map_err(RenderError::creation("framebuffer"))?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// SwapchainManager
// ─────────────────────────────────────────────────────────────────────────

pub struct SwapchainManager<G: Gpu> {
    gpu: Arc<G>,
    options: SwapchainOptions,
    generation: Option<SwapchainGeneration>,
    // Fixed by the first build; the render pass is compiled against it
    locked_format: Option<vk::Format>,
    status: SwapchainStatus,
    next_id: u64,
    lifecycle: Lifecycle,
}

impl<G: Gpu> SwapchainManager<G> {
    pub fn new(
        gpu: Arc<G>,
        render_pass: vk::RenderPass,
        support: &SwapchainSupport,
        options: SwapchainOptions,
    ) -> Result<Self> {
        let mut manager = Self {
            gpu,
            options,
            generation: None,
            locked_format: None,
            status: SwapchainStatus::Uninitialized,
            next_id: 0,
            lifecycle: Lifecycle::Active,
        };
        if let Err(err) = manager.install(render_pass, support) {
            // Nothing was kept; nothing to destroy
            manager.lifecycle.tear_down();
            return Err(err);
        }
        Ok(manager)
    }

    /// Wait for idle, destroy the current generation, build a new one
    pub fn resize(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        self.lifecycle.ensure_active("SwapchainManager")?;
        self.status = SwapchainStatus::Rebuilding;

        // No in-flight frame may still reference the old images
        self.gpu
            .device_wait_idle()
            .map_err(RenderError::device("wait idle before swapchain rebuild"))?;

        if let Some(old) = self.generation.take() {
            log::debug!("Destroying swapchain generation {}", old.id);
            if let Err(err) = old.destroy(&*self.gpu) {
                self.status = SwapchainStatus::Suspended;
                return Err(err);
            }
        }

        let support = match SwapchainSupport::query(&*self.gpu) {
            Ok(support) => support,
            Err(err) => {
                self.status = SwapchainStatus::Suspended;
                return Err(err);
            }
        };
        self.install(render_pass, &support)
    }

    fn install(&mut self, render_pass: vk::RenderPass, support: &SwapchainSupport) -> Result<()> {
        match self.build(render_pass, support) {
            Ok(Some(generation)) => {
                self.generation = Some(generation);
                self.status = SwapchainStatus::Ready;
                Ok(())
            }
            Ok(None) => {
                log::info!("Surface has zero area; swapchain suspended");
                self.status = SwapchainStatus::Suspended;
                Ok(())
            }
            Err(err) => {
                log::error!("Swapchain build failed: {}", err);
                self.status = SwapchainStatus::Suspended;
                Err(err)
            }
        }
    }

    fn build(
        &mut self,
        render_pass: vk::RenderPass,
        support: &SwapchainSupport,
    ) -> Result<Option<SwapchainGeneration>> {
        let gpu = &*self.gpu;

        let surface_format = support.choose_surface_format()?;
        if let Some(locked) = self.locked_format {
            if locked != surface_format.format {
                return Err(RenderError::SurfaceFormatChanged {
                    old: locked,
                    new: surface_format.format,
                });
            }
        }
        let present_mode = support.choose_present_mode(self.options.preferred_present_mode)?;

        let extent = support.choose_extent(self.options.framebuffer_size);
        if is_zero_area(extent) {
            return Ok(None);
        }
        let image_count = support.image_count();

        let families = gpu.queue_families();
        let family_indices = [families.graphics, families.present];
        let base_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(gpu.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        let create_info = if families.is_shared() {
            base_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            base_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = gpu
            .create_swapchain(&create_info)
            .map_err(RenderError::creation("swapchain"))?;

        self.next_id += 1;
        let mut generation = SwapchainGeneration {
            id: self.next_id,
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            surface_format,
            extent,
            present_mode,
        };

        if let Err(err) = generation.fill(gpu, render_pass, self.options.depth_format) {
            // Never keep a mixed or partial generation
            generation.destroy(gpu)?;
            return Err(err);
        }

        self.locked_format = Some(surface_format.format);
        log::info!(
            "Created swapchain generation {}: {}x{}, {:?}, {:?}, {} images",
            generation.id,
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            generation.images.len()
        );
        Ok(Some(generation))
    }

    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    pub fn acquire_next_image_index(&self, semaphore: vk::Semaphore) -> Result<AcquireResult> {
        self.lifecycle.ensure_active("SwapchainManager")?;
        let Some(generation) = &self.generation else {
            return Ok(AcquireResult::OutOfDate);
        };

        match self
            .gpu
            .acquire_next_image(generation.swapchain, u64::MAX, semaphore)
        {
            Ok((index, false)) => Ok(AcquireResult::Ready(index)),
            Ok((index, true)) => {
                log::debug!("Acquire reported suboptimal swapchain");
                Ok(AcquireResult::Suboptimal(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Acquire reported out-of-date swapchain");
                Ok(AcquireResult::OutOfDate)
            }
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(RenderError::SurfaceLost),
            Err(result) => Err(RenderError::device("acquire next image")(result)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        wait_semaphores: &[vk::Semaphore],
        queue: vk::Queue,
        image_index: u32,
    ) -> Result<PresentResult> {
        self.lifecycle.ensure_active("SwapchainManager")?;
        let Some(generation) = &self.generation else {
            return Ok(PresentResult::OutOfDate);
        };

        let swapchains = [generation.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.gpu.queue_present(queue, &present_info) {
            Ok(false) => Ok(PresentResult::Success),
            Ok(true) => {
                log::debug!("Present reported suboptimal swapchain");
                Ok(PresentResult::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Present reported out-of-date swapchain");
                Ok(PresentResult::OutOfDate)
            }
            Err(result) => Err(RenderError::PresentationFailure(result)),
        }
    }

    /// Record the platform framebuffer size for the next build
    pub fn set_framebuffer_size(&mut self, width: u32, height: u32) {
        self.options.framebuffer_size = vk::Extent2D { width, height };
    }

    pub fn status(&self) -> SwapchainStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == SwapchainStatus::Ready
    }

    /// Zero while suspended
    pub fn extent(&self) -> vk::Extent2D {
        self.generation
            .as_ref()
            .map(|g| g.extent)
            .unwrap_or_default()
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.generation.as_ref().map(|g| g.surface_format)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.generation.as_ref().map(|g| g.present_mode)
    }

    pub fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.images.len())
    }

    /// Changes every time the image set is replaced
    pub fn generation_id(&self) -> Option<u64> {
        self.generation.as_ref().map(|g| g.id)
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.generation
            .as_ref()
            .and_then(|g| g.framebuffers.get(image_index as usize).copied())
    }

    /// Caller must ensure the device is idle
    pub fn destroy(&mut self) -> Result<()> {
        self.lifecycle.ensure_active("SwapchainManager")?;
        if let Some(generation) = self.generation.take() {
            generation.destroy(&*self.gpu)?;
        }
        self.status = SwapchainStatus::TornDown;
        self.lifecycle.tear_down();
        log::info!("Swapchain destroyed");
        Ok(())
    }
}

impl<G: Gpu> Drop for SwapchainManager<G> {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("SwapchainManager");
    }
}
