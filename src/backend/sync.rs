// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct and efficient multi-frame rendering

use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use ash::vk;

/// Resources for one frame in flight.
///
/// Slot i's command buffer and semaphores may only be reused once
/// `in_flight` has signaled for slot i's previous submission.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// Command pool whose buffers can be reset one at a time
    pub fn create_pool<G: Gpu>(gpu: &G) -> Result<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(gpu.queue_families().graphics);

        gpu.create_command_pool(&pool_info)
            .map_err(RenderError::creation("frame command pool"))
    }

    /// Create `count` slots from `pool`. On failure nothing is left behind
    /// except the pool's command buffers, which go with the pool.
    pub fn create_all<G: Gpu>(gpu: &G, pool: vk::CommandPool, count: usize) -> Result<Vec<Self>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let command_buffers = gpu
            .allocate_command_buffers(&alloc_info)
            .map_err(RenderError::creation("frame command buffers"))?;

        let mut slots = Vec::with_capacity(count);
        for command_buffer in command_buffers {
            match Self::create_sync(gpu, command_buffer) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for slot in &slots {
                        slot.destroy(gpu);
                    }
                    return Err(err);
                }
            }
        }
        Ok(slots)
    }

    fn create_sync<G: Gpu>(gpu: &G, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let image_available = gpu
            .create_semaphore()
            .map_err(RenderError::creation("image-available semaphore"))?;

        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(result) => {
                gpu.destroy_semaphore(image_available);
                return Err(RenderError::creation("render-finished semaphore")(result));
            }
        };

        // Start signaled so the first wait on each slot returns immediately
        let in_flight = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(result) => {
                gpu.destroy_semaphore(image_available);
                gpu.destroy_semaphore(render_finished);
                return Err(RenderError::creation("in-flight fence")(result));
            }
        };

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Semaphores and fence only; the command buffer belongs to the pool
    pub fn destroy<G: Gpu>(&self, gpu: &G) {
        gpu.destroy_semaphore(self.image_available);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_fence(self.in_flight);
    }
}
