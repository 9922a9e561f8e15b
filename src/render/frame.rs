// Frame coordinator - the per-frame state machine
//
// Owns N frame slots and drives, once per tick:
//   wait fence -> acquire -> update slot data -> record -> reset fence
//   -> submit -> present -> advance slot
//
// The fence wait at the top bounds CPU run-ahead to N frames. Swapchain
// invalidation is reported as DrawFrameResult::SwapchainOutOfDate and handled
// by a full SwapchainManager rebuild; it is never an error.

use crate::backend::gpu::Gpu;
use crate::backend::swapchain::{AcquireResult, PresentResult, SwapchainManager};
use crate::backend::sync::FrameSlot;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;
use std::sync::Arc;

pub const MIN_FRAMES_IN_FLIGHT: usize = 1;
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawFrameResult {
    Success,
    /// Nothing was presented this tick, or the swapchain must be rebuilt
    /// before the next one
    SwapchainOutOfDate,
}

/// Image the current frame renders into
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub image_index: u32,
}

/// What the coordinator drives each frame
pub trait FrameRenderer<G: Gpu> {
    /// Render pass the swapchain framebuffers are built against
    fn render_pass(&self) -> vk::RenderPass;

    /// Number of per-frame resource sets; must cover every frame slot
    fn slot_count(&self) -> usize;

    /// Write slot `slot`'s per-frame buffers. The slot's previous GPU use has
    /// retired when this is called.
    fn update_frame(&mut self, gpu: &G, slot: usize, extent: vk::Extent2D) -> Result<()>;

    /// Record the frame into `cmd`, which is reset and not yet begun
    fn record(&self, gpu: &G, cmd: vk::CommandBuffer, target: &FrameTarget, slot: usize)
        -> Result<()>;

    /// Buffers, images and descriptors
    fn destroy_frame_resources(&mut self, gpu: &G) -> Result<()>;

    /// Pipeline, layouts and the render pass; runs after the sync objects
    fn destroy_pipeline(&mut self, gpu: &G) -> Result<()>;
}

pub struct FrameCoordinator<G: Gpu, R: FrameRenderer<G>> {
    gpu: Arc<G>,
    swapchain: SwapchainManager<G>,
    renderer: R,
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    current_slot: usize,
    needs_rebuild: bool,
    frames_drawn: u64,
    lifecycle: Lifecycle,
}

impl<G: Gpu, R: FrameRenderer<G>> FrameCoordinator<G, R> {
    /// Takes ownership of the swapchain and renderer. If slot creation fails
    /// both are destroyed before the error is returned.
    pub fn new(
        gpu: Arc<G>,
        mut swapchain: SwapchainManager<G>,
        mut renderer: R,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let frames_in_flight = frames_in_flight.clamp(MIN_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT);

        let renderer_slots = renderer.slot_count();
        if renderer_slots < frames_in_flight {
            swapchain.destroy()?;
            renderer.destroy_frame_resources(&*gpu)?;
            renderer.destroy_pipeline(&*gpu)?;
            return Err(RenderError::FrameSlotMismatch {
                frames_in_flight,
                renderer_slots,
            });
        }

        let sync = FrameSlot::create_pool(&*gpu).and_then(|pool| {
            match FrameSlot::create_all(&*gpu, pool, frames_in_flight) {
                Ok(slots) => Ok((pool, slots)),
                Err(err) => {
                    gpu.destroy_command_pool(pool);
                    Err(err)
                }
            }
        });

        let (command_pool, slots) = match sync {
            Ok(sync) => sync,
            Err(err) => {
                swapchain.destroy()?;
                renderer.destroy_frame_resources(&*gpu)?;
                renderer.destroy_pipeline(&*gpu)?;
                return Err(err);
            }
        };

        log::info!("Frame coordinator ready with {} frames in flight", frames_in_flight);

        Ok(Self {
            gpu,
            swapchain,
            renderer,
            command_pool,
            slots,
            current_slot: 0,
            needs_rebuild: false,
            frames_drawn: 0,
            lifecycle: Lifecycle::Active,
        })
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self) -> Result<DrawFrameResult> {
        self.lifecycle.ensure_active("FrameCoordinator")?;
        let slot = self.slots[self.current_slot];

        // 1. Everything this slot submitted last time has retired
        self.gpu
            .wait_for_fence(slot.in_flight, u64::MAX)
            .map_err(RenderError::device("wait for in-flight fence"))?;

        // 2. Pending resize first, then acquire. Early exits leave the fence
        //    signaled so the next call waits on it without blocking.
        if self.needs_rebuild {
            self.rebuild("resize requested")?;
            return Ok(DrawFrameResult::SwapchainOutOfDate);
        }
        if !self.swapchain.is_ready() {
            return Ok(DrawFrameResult::SwapchainOutOfDate);
        }

        let image_index = match self.swapchain.acquire_next_image_index(slot.image_available)? {
            AcquireResult::Ready(index) => index,
            AcquireResult::Suboptimal(index) => {
                self.needs_rebuild = true;
                index
            }
            AcquireResult::OutOfDate => {
                self.rebuild("acquire reported out of date")?;
                return Ok(DrawFrameResult::SwapchainOutOfDate);
            }
        };

        // 3. The acquire signaled image_available; a failure from here on must
        //    still consume it and leave the fence able to signal
        if let Err(err) = self.submit_frame(slot, image_index) {
            self.release_slot(slot);
            return Err(err);
        }

        // 4. This frame's GPU work is already queued; an out-of-date present
        //    defers the rebuild to the next call
        let presented = self.swapchain.present(
            &[slot.render_finished],
            self.gpu.present_queue(),
            image_index,
        )?;
        let result = match presented {
            PresentResult::Success => DrawFrameResult::Success,
            PresentResult::Suboptimal => {
                self.needs_rebuild = true;
                DrawFrameResult::Success
            }
            PresentResult::OutOfDate => {
                self.needs_rebuild = true;
                DrawFrameResult::SwapchainOutOfDate
            }
        };

        // Advance even when out of date: this slot's fence is pending
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        self.frames_drawn += 1;
        Ok(result)
    }

    /// Update, record and submit the acquired image on `slot`
    fn submit_frame(&mut self, slot: FrameSlot, image_index: u32) -> Result<()> {
        let Some(framebuffer) = self.swapchain.framebuffer(image_index) else {
            debug_assert!(false, "acquired image {} has no framebuffer", image_index);
            return Err(RenderError::Device {
                operation: "acquire next image (index out of range)",
                result: vk::Result::ERROR_UNKNOWN,
            });
        };
        let extent = self.swapchain.extent();

        self.renderer
            .update_frame(&*self.gpu, self.current_slot, extent)?;

        self.gpu
            .reset_command_buffer(slot.command_buffer)
            .map_err(RenderError::device("reset frame command buffer"))?;
        let target = FrameTarget {
            framebuffer,
            extent,
            image_index,
        };
        self.renderer
            .record(&*self.gpu, slot.command_buffer, &target, self.current_slot)?;

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        // Reset only once the submission is the next call
        self.gpu
            .reset_fence(slot.in_flight)
            .map_err(RenderError::device("reset in-flight fence"))?;
        self.gpu
            .queue_submit(self.gpu.graphics_queue(), &[submit_info], slot.in_flight)
            .map_err(RenderError::device("submit frame"))
    }

    /// Empty submission that waits on the slot's acquire semaphore and
    /// signals its fence, after a frame failed before its own submission.
    /// The acquired image is not presented.
    fn release_slot(&self, slot: FrameSlot) {
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        let released = self.gpu.reset_fence(slot.in_flight).and_then(|()| {
            self.gpu
                .queue_submit(self.gpu.graphics_queue(), &[submit_info], slot.in_flight)
        });
        if let Err(result) = released {
            log::error!("Could not release frame slot {}: {}", self.current_slot, result);
        }
    }

    fn rebuild(&mut self, reason: &str) -> Result<()> {
        log::info!("Rebuilding swapchain: {}", reason);
        self.needs_rebuild = false;
        self.swapchain.resize(self.renderer.render_pass())
    }

    /// Platform resize or minimize. Consumed at the top of the next draw_frame.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        log::debug!("Framebuffer resized to {}x{}", width, height);
        self.swapchain.set_framebuffer_size(width, height);
        self.needs_rebuild = true;
    }

    /// Block until every submitted frame has retired
    pub fn wait_idle(&self) -> Result<()> {
        self.lifecycle.ensure_active("FrameCoordinator")?;
        self.gpu
            .device_wait_idle()
            .map_err(RenderError::device("wait idle"))
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn swapchain(&self) -> &SwapchainManager<G> {
        &self.swapchain
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Tear everything down in dependency order:
    /// framebuffers, views, swapchain, buffers/memory, sync objects, pipeline.
    /// The device itself goes last, with its owner.
    pub fn destroy(&mut self) -> Result<()> {
        self.lifecycle.ensure_active("FrameCoordinator")?;
        self.wait_idle()?;

        self.swapchain.destroy()?;
        self.renderer.destroy_frame_resources(&*self.gpu)?;

        for slot in &self.slots {
            slot.destroy(&*self.gpu);
        }
        self.slots.clear();
        self.gpu.destroy_command_pool(self.command_pool);

        self.renderer.destroy_pipeline(&*self.gpu)?;

        self.lifecycle.tear_down();
        log::info!("Frame coordinator destroyed after {} frames", self.frames_drawn);
        Ok(())
    }
}

impl<G: Gpu, R: FrameRenderer<G>> Drop for FrameCoordinator<G, R> {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("FrameCoordinator");
    }
}
