// One-shot command submission for setup-time uploads
//
// Uploads record into a transient command buffer, submit without a fence and
// block on queue idle. Never used from the frame loop.

use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;

/// Transient command pool on the graphics family plus the queue uploads go to
pub struct UploadContext {
    pool: vk::CommandPool,
    queue: vk::Queue,
    lifecycle: Lifecycle,
}

impl UploadContext {
    pub fn new<G: Gpu>(gpu: &G) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(gpu.queue_families().graphics);

        let pool = gpu
            .create_command_pool(&pool_info)
            .map_err(RenderError::creation("upload command pool"))?;

        Ok(Self {
            pool,
            queue: gpu.graphics_queue(),
            lifecycle: Lifecycle::Active,
        })
    }

    /// Record with `record`, submit, and wait until the queue is idle
    pub fn run<G, F>(&self, gpu: &G, record: F) -> Result<()>
    where
        G: Gpu,
        F: FnOnce(vk::CommandBuffer),
    {
        let command = SingleTimeCommand::begin(gpu, self)?;
        record(command.cmd());
        command.submit_and_wait(gpu)
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("UploadContext")?;
        gpu.destroy_command_pool(self.pool);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("UploadContext");
    }
}

/// A primary command buffer recorded once and freed after submission
pub struct SingleTimeCommand {
    cmd: vk::CommandBuffer,
    pool: vk::CommandPool,
    queue: vk::Queue,
}

impl SingleTimeCommand {
    pub fn begin<G: Gpu>(gpu: &G, upload: &UploadContext) -> Result<Self> {
        upload.lifecycle.ensure_active("UploadContext")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(upload.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = gpu
            .allocate_command_buffers(&alloc_info)
            .map_err(RenderError::creation("upload command buffer"))?
            .into_iter()
            .next()
            .ok_or(RenderError::ResourceCreation {
                resource: "upload command buffer",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(result) = gpu.begin_command_buffer(cmd, &begin_info) {
            gpu.free_command_buffers(upload.pool, &[cmd]);
            return Err(RenderError::device("begin upload commands")(result));
        }

        Ok(Self {
            cmd,
            pool: upload.pool,
            queue: upload.queue,
        })
    }

    pub fn cmd(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// End, submit and block on queue idle; the command buffer is freed either way
    pub fn submit_and_wait<G: Gpu>(self, gpu: &G) -> Result<()> {
        let result = self.submit(gpu);
        gpu.free_command_buffers(self.pool, &[self.cmd]);
        result
    }

    fn submit<G: Gpu>(&self, gpu: &G) -> Result<()> {
        gpu.end_command_buffer(self.cmd)
            .map_err(RenderError::device("end upload commands"))?;

        let command_buffers = [self.cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        gpu.queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
            .map_err(RenderError::device("upload submit"))?;
        gpu.queue_wait_idle(self.queue)
            .map_err(RenderError::device("upload queue wait"))?;
        Ok(())
    }
}
