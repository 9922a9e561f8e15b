// Recording fake device for tests
//
// MockGpu implements Gpu without a driver. It hands out unique handles, keeps
// a live count per object kind, backs device memory with host bytes and runs
// recorded copy and barrier commands at submit time.
//
// GPU progress is modelled explicitly: a submission stays in flight until the
// CPU waits on its fence or idles the queue/device. Misuse of that model
// (reusing a slot too early, resetting a pending fence, ...) is recorded as a
// violation instead of panicking so tests can assert on the whole history.

use crate::backend::gpu::{Gpu, QueueFamilyIndices};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
    ShaderModule,
    RenderPass,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    Swapchain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

/// Scripted outcome for the next acquire call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireScript {
    Image(u32),
    Suboptimal(u32),
    OutOfDate,
    Error(vk::Result),
}

/// Scripted outcome for the next present call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentScript {
    Success,
    Suboptimal,
    OutOfDate,
    Error(vk::Result),
}

/// Calls whose ordering tests care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    BeginCommandBuffer(vk::CommandBuffer),
    ResetCommandBuffer(vk::CommandBuffer),
    Submit(Vec<vk::CommandBuffer>),
    QueueWaitIdle,
    DeviceWaitIdle,
    Acquire,
    Present(u32),
    CreateSwapchain,
    DestroySwapchain,
    DestroyFramebuffer,
}

/// Command recorded into a command buffer
#[derive(Debug, Clone)]
pub enum Command {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
    },
    Barrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    BindDescriptorSet(vk::DescriptorSet),
    DrawIndexed(u32),
}

#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub min_image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub images: Vec<vk::Image>,
}

#[derive(Debug, Clone)]
pub struct FramebufferRecord {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

#[derive(Debug)]
struct BufferRecord {
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory: Option<vk::DeviceMemory>,
}

#[derive(Debug)]
struct ImageRecord {
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    extent: vk::Extent3D,
    layout: vk::ImageLayout,
    memory: Option<vk::DeviceMemory>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct MemoryRecord {
    type_index: u32,
    bytes: Box<[u8]>,
}

#[derive(Debug)]
struct InFlight {
    command_buffers: Vec<vk::CommandBuffer>,
    fence: vk::Fence,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,
    violations: Vec<String>,
    calls: Vec<Call>,

    memory_types: Vec<vk::MemoryPropertyFlags>,
    format_features: HashMap<vk::Format, vk::FormatFeatureFlags>,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    surface: vk::SurfaceKHR,

    buffers: HashMap<vk::Buffer, BufferRecord>,
    images: HashMap<vk::Image, ImageRecord>,
    memory: HashMap<vk::DeviceMemory, MemoryRecord>,
    views: HashMap<vk::ImageView, vk::Image>,
    pool_buffers: HashMap<vk::CommandPool, Vec<vk::CommandBuffer>>,
    recording: HashMap<vk::CommandBuffer, Vec<Command>>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    framebuffers: HashMap<vk::Framebuffer, FramebufferRecord>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainRecord>,
    swapchain_history: Vec<SwapchainRecord>,
    descriptor_writes: usize,

    in_flight: Vec<InFlight>,
    max_in_flight: usize,
    submits: Vec<SubmitRecord>,

    capabilities: vk::SurfaceCapabilitiesKHR,
    surface_formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    acquire_script: VecDeque<AcquireScript>,
    present_script: VecDeque<PresentScript>,
    next_image: u32,
    fail_create: HashMap<Kind, usize>,
}

pub struct MockGpu {
    state: Mutex<State>,
}

unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if count == 0 || ptr.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

impl State {
    fn handle<H: Handle>(&mut self, kind: Kind) -> H {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        H::from_raw(self.next_handle)
    }

    /// Consume a scripted failure for this kind, if one is due
    fn should_fail(&mut self, kind: Kind) -> bool {
        let Some(remaining) = self.fail_create.get_mut(&kind) else {
            return false;
        };
        if *remaining > 0 {
            *remaining -= 1;
            return false;
        }
        self.fail_create.remove(&kind);
        true
    }

    fn create<H: Handle>(&mut self, kind: Kind) -> VkResult<H> {
        if self.should_fail(kind) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(self.handle(kind))
    }

    fn release<H: Handle>(&mut self, handle: H, kind: Kind) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => self
                .violations
                .push(format!("destroyed {:?} {:#x} as {:?}", found, raw, kind)),
            None => self
                .violations
                .push(format!("destroyed unknown or already destroyed {:?} {:#x}", kind, raw)),
        }
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn cmd_is_pending(&self, cmd: vk::CommandBuffer) -> bool {
        self.in_flight
            .iter()
            .any(|work| work.command_buffers.contains(&cmd))
    }

    fn signal_fence(&mut self, fence: vk::Fence) {
        self.in_flight.retain(|work| work.fence != fence);
        self.fences.insert(fence, FenceState::Signaled);
    }

    fn drain(&mut self) {
        let fences: Vec<_> = self
            .in_flight
            .drain(..)
            .map(|work| work.fence)
            .filter(|fence| *fence != vk::Fence::null())
            .collect();
        for fence in fences {
            self.fences.insert(fence, FenceState::Signaled);
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.recording.get_mut(&cmd) {
            Some(commands) => commands.push(command),
            None => self.violation(format!("recorded into unknown command buffer {:?}", cmd)),
        }
    }

    fn buffer_memory(&self, buffer: vk::Buffer) -> Option<vk::DeviceMemory> {
        self.buffers.get(&buffer).and_then(|record| record.memory)
    }

    fn execute(&mut self, cmd: vk::CommandBuffer) {
        let commands = self.recording.get(&cmd).cloned().unwrap_or_default();
        for command in commands {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    let (Some(src_mem), Some(dst_mem)) =
                        (self.buffer_memory(src), self.buffer_memory(dst))
                    else {
                        self.violation("copy between unbound buffers".to_string());
                        continue;
                    };
                    for region in regions {
                        let from = region.src_offset as usize;
                        let to = region.dst_offset as usize;
                        let len = region.size as usize;
                        let bytes = self.memory[&src_mem].bytes[from..from + len].to_vec();
                        if let Some(dst_record) = self.memory.get_mut(&dst_mem) {
                            dst_record.bytes[to..to + len].copy_from_slice(&bytes);
                        }
                    }
                }
                Command::CopyBufferToImage { src, dst, layout } => {
                    let Some(src_mem) = self.buffer_memory(src) else {
                        self.violation("copy from unbound buffer".to_string());
                        continue;
                    };
                    let Some(current) = self.images.get(&dst).map(|image| image.layout) else {
                        self.violation("copy into unknown image".to_string());
                        continue;
                    };
                    if current != layout {
                        self.violation(format!(
                            "copy into image in {:?}, command claims {:?}",
                            current, layout
                        ));
                        continue;
                    }
                    let bytes = self.memory[&src_mem].bytes.to_vec();
                    if let Some(image) = self.images.get_mut(&dst) {
                        let len = image.data.len().min(bytes.len());
                        image.data[..len].copy_from_slice(&bytes[..len]);
                    }
                }
                Command::Barrier { image, old, new, .. } => {
                    // Swapchain images are not tracked for layout
                    let Some(current) = self.images.get(&image).map(|record| record.layout) else {
                        continue;
                    };
                    if old != vk::ImageLayout::UNDEFINED && current != old {
                        self.violation(format!(
                            "barrier from {:?} but image is in {:?}",
                            old, current
                        ));
                    }
                    if let Some(record) = self.images.get_mut(&image) {
                        record.layout = new;
                    }
                }
                _ => {}
            }
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in self.memory_types.iter().enumerate() {
            properties.memory_types[slot] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        properties.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        properties
    }

    fn all_memory_types(&self) -> u32 {
        (1u32 << self.memory_types.len()) - 1
    }
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    pub fn new() -> Self {
        let mut format_features = HashMap::new();
        for format in [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ] {
            format_features.insert(format, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        }

        let mut state = State {
            next_handle: 0,
            live: HashMap::new(),
            violations: Vec::new(),
            calls: Vec::new(),
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            format_features,
            queue_families: QueueFamilyIndices {
                graphics: 0,
                present: 0,
            },
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            surface: vk::SurfaceKHR::null(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            memory: HashMap::new(),
            views: HashMap::new(),
            pool_buffers: HashMap::new(),
            recording: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            framebuffers: HashMap::new(),
            swapchains: HashMap::new(),
            swapchain_history: Vec::new(),
            descriptor_writes: 0,
            in_flight: Vec::new(),
            max_in_flight: 0,
            submits: Vec::new(),
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
            fail_create: HashMap::new(),
        };
        // Queues and the surface are not owned objects
        state.next_handle = 0x100;
        state.graphics_queue = vk::Queue::from_raw(0x10);
        state.present_queue = state.graphics_queue;
        state.surface = vk::SurfaceKHR::from_raw(0x20);

        Self {
            state: Mutex::new(state),
        }
    }

    /// Graphics and present on different families (and queues)
    pub fn with_queue_families(graphics: u32, present: u32) -> Self {
        let gpu = Self::new();
        {
            let mut state = gpu.state.lock();
            state.queue_families = QueueFamilyIndices { graphics, present };
            if graphics != present {
                state.present_queue = vk::Queue::from_raw(0x11);
            }
        }
        gpu
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_memory_types(&self, types: Vec<vk::MemoryPropertyFlags>) {
        self.state.lock().memory_types = types;
    }

    pub fn set_format_features(&self, format: vk::Format, features: vk::FormatFeatureFlags) {
        self.state.lock().format_features.insert(format, features);
    }

    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.lock().surface_formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.lock().present_modes = modes;
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.lock().capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn script_acquire(&self, outcome: AcquireScript) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentScript) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// Let `successes` creates of `kind` succeed, then fail the next one
    pub fn fail_create_after(&self, kind: Kind, successes: usize) {
        self.state.lock().fail_create.insert(kind, successes);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.state.lock().submits.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().submits.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .in_flight
            .iter()
            .filter(|work| work.fence != vk::Fence::null())
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.lock().fences.get(&fence).copied()
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state
            .lock()
            .semaphores
            .get(&semaphore)
            .copied()
            .unwrap_or(false)
    }

    pub fn commands(&self, cmd: vk::CommandBuffer) -> Vec<Command> {
        self.state
            .lock()
            .recording
            .get(&cmd)
            .cloned()
            .unwrap_or_default()
    }

    /// Bytes currently stored in the memory bound to `buffer`
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        let state = self.state.lock();
        let Some(record) = state.buffers.get(&buffer) else {
            return Vec::new();
        };
        record
            .memory
            .and_then(|memory| state.memory.get(&memory))
            .map(|memory| memory.bytes[..record.size as usize].to_vec())
            .unwrap_or_default()
    }

    pub fn buffer_usage(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.state.lock().buffers.get(&buffer).map(|b| b.usage)
    }

    /// Property flags of the memory type backing `buffer`
    pub fn buffer_memory_flags(&self, buffer: vk::Buffer) -> Option<vk::MemoryPropertyFlags> {
        let state = self.state.lock();
        let memory = state.buffer_memory(buffer)?;
        let type_index = state.memory.get(&memory)?.type_index;
        state.memory_types.get(type_index as usize).copied()
    }

    pub fn image_contents(&self, image: vk::Image) -> Vec<u8> {
        self.state
            .lock()
            .images
            .get(&image)
            .map(|record| record.data.clone())
            .unwrap_or_default()
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state.lock().images.get(&image).map(|record| record.layout)
    }

    pub fn image_format(&self, image: vk::Image) -> Option<vk::Format> {
        self.state.lock().images.get(&image).map(|record| record.format)
    }

    pub fn image_usage(&self, image: vk::Image) -> Option<vk::ImageUsageFlags> {
        self.state.lock().images.get(&image).map(|record| record.usage)
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.lock().live.contains_key(&handle.as_raw())
    }

    pub fn swapchains_created(&self) -> Vec<SwapchainRecord> {
        self.state.lock().swapchain_history.clone()
    }

    pub fn framebuffer(&self, framebuffer: vk::Framebuffer) -> Option<FramebufferRecord> {
        self.state.lock().framebuffers.get(&framebuffer).cloned()
    }

    pub fn descriptor_writes(&self) -> usize {
        self.state.lock().descriptor_writes
    }
}

impl Gpu for MockGpu {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.state.lock().queue_families
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.state.lock().graphics_queue
    }

    fn present_queue(&self) -> vk::Queue {
        self.state.lock().present_queue
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state.lock().memory_properties()
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let features = self
            .state
            .lock()
            .format_features
            .get(&format)
            .copied()
            .unwrap_or_default();
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    fn max_sampler_anisotropy(&self) -> f32 {
        16.0
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeviceWaitIdle);
        state.drain();
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        if info.size == 0 {
            // Undefined behaviour on a real driver
            state.violation("create_buffer with size 0".to_string());
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let buffer: vk::Buffer = state.create(Kind::Buffer)?;
        state.buffers.insert(
            buffer,
            BufferRecord {
                size: info.size,
                usage: info.usage,
                memory: None,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.release(buffer, Kind::Buffer);
        state.buffers.remove(&buffer);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock();
        vk::MemoryRequirements {
            size: state.buffers.get(&buffer).map_or(0, |b| b.size),
            alignment: 4,
            memory_type_bits: state.all_memory_types(),
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.memory.contains_key(&memory) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        match state.buffers.get_mut(&buffer) {
            Some(record) => {
                record.memory = Some(memory);
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        if info.memory_type_index as usize >= state.memory_types.len() {
            state.violation(format!("invalid memory type {}", info.memory_type_index));
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let memory: vk::DeviceMemory = state.create(Kind::Memory)?;
        state.memory.insert(
            memory,
            MemoryRecord {
                type_index: info.memory_type_index,
                bytes: vec![0u8; info.allocation_size as usize].into_boxed_slice(),
            },
        );
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        let still_bound = state.buffers.values().any(|b| b.memory == Some(memory))
            || state.images.values().any(|i| i.memory == Some(memory));
        if still_bound {
            state.violation(format!("memory {:?} freed before its resource", memory));
        }
        state.release(memory, Kind::Memory);
        state.memory.remove(&memory);
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<*mut u8> {
        let mut state = self.state.lock();
        let host_visible = state.memory.get(&memory).map(|record| {
            state.memory_types[record.type_index as usize]
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        });
        match host_visible {
            Some(true) => {}
            Some(false) => {
                state.violation(format!("mapped device-local memory {:?}", memory));
                return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
            }
            None => return Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        }
        let Some(record) = state.memory.get_mut(&memory) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        if size as usize > record.bytes.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        Ok(record.bytes.as_mut_ptr())
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let mut state = self.state.lock();
        if info.extent.width == 0 || info.extent.height == 0 {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let image: vk::Image = state.create(Kind::Image)?;
        let len = (info.extent.width * info.extent.height * info.extent.depth * 4) as usize;
        state.images.insert(
            image,
            ImageRecord {
                format: info.format,
                usage: info.usage,
                extent: info.extent,
                layout: info.initial_layout,
                memory: None,
                data: vec![0u8; len],
            },
        );
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if state.views.values().any(|viewed| *viewed == image) {
            state.violation(format!("image {:?} destroyed before its view", image));
        }
        state.release(image, Kind::Image);
        state.images.remove(&image);
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let size = state.images.get(&image).map_or(0, |record| {
            u64::from(record.extent.width) * u64::from(record.extent.height) * 4
        });
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: state.all_memory_types(),
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.memory.contains_key(&memory) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        match state.images.get_mut(&image) {
            Some(record) => {
                record.memory = Some(memory);
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        let view: vk::ImageView = state.create(Kind::ImageView)?;
        state.views.insert(view, info.image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        let in_use = state
            .framebuffers
            .values()
            .any(|fb| fb.attachments.contains(&view));
        if in_use {
            state.violation(format!("view {:?} destroyed before its framebuffer", view));
        }
        state.release(view, Kind::ImageView);
        state.views.remove(&view);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        self.state.lock().create(Kind::Sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.lock().release(sampler, Kind::Sampler);
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool: vk::CommandPool = state.create(Kind::CommandPool)?;
        state.pool_buffers.insert(pool, Vec::new());
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let buffers = state.pool_buffers.remove(&pool).unwrap_or_default();
        for cmd in buffers {
            if state.cmd_is_pending(cmd) {
                state.violation(format!("pool destroyed while {:?} is pending", cmd));
            }
            state.release(cmd, Kind::CommandBuffer);
            state.recording.remove(&cmd);
        }
        state.release(pool, Kind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if !state.pool_buffers.contains_key(&info.command_pool) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let mut buffers = Vec::with_capacity(info.command_buffer_count as usize);
        for _ in 0..info.command_buffer_count {
            let cmd: vk::CommandBuffer = state.create(Kind::CommandBuffer)?;
            state.recording.insert(cmd, Vec::new());
            buffers.push(cmd);
        }
        if let Some(owned) = state.pool_buffers.get_mut(&info.command_pool) {
            owned.extend_from_slice(&buffers);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for &cmd in buffers {
            if state.cmd_is_pending(cmd) {
                state.violation(format!("freed {:?} while pending", cmd));
            }
            state.release(cmd, Kind::CommandBuffer);
            state.recording.remove(&cmd);
        }
        if let Some(owned) = state.pool_buffers.get_mut(&pool) {
            owned.retain(|cmd| !buffers.contains(cmd));
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::BeginCommandBuffer(cmd));
        if state.cmd_is_pending(cmd) {
            state.violation(format!("re-recorded {:?} while its submission is pending", cmd));
        }
        match state.recording.get_mut(&cmd) {
            Some(commands) => {
                commands.clear();
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetCommandBuffer(cmd));
        if state.cmd_is_pending(cmd) {
            state.violation(format!("reset {:?} while its submission is pending", cmd));
        }
        if let Some(commands) = state.recording.get_mut(&cmd) {
            commands.clear();
        }
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state
            .lock()
            .record(cmd, Command::CopyBufferToImage { src, dst, layout });
    }

    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        self.state.lock().record(
            cmd,
            Command::Barrier {
                image: barrier.image,
                old: barrier.old_layout,
                new: barrier.new_layout,
                src_access: barrier.src_access_mask,
                dst_access: barrier.dst_access_mask,
                src_stage,
                dst_stage,
            },
        );
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        let mut state = self.state.lock();
        if !state.framebuffers.contains_key(&info.framebuffer) {
            state.violation(format!("render pass begun on dead framebuffer {:?}", info.framebuffer));
        }
        state.record(
            cmd,
            Command::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: info.render_area.extent,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, Command::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state.lock().record(cmd, Command::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state.lock().record(cmd, Command::SetViewport(viewport));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state.lock().record(cmd, Command::SetScissor(scissor));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.state.lock().record(cmd, Command::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.state
            .lock()
            .record(cmd, Command::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.state.lock().record(cmd, Command::BindDescriptorSet(set));
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        self.state.lock().record(cmd, Command::DrawIndexed(index_count));
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore: vk::Semaphore = state.create(Kind::Semaphore)?;
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.release(semaphore, Kind::Semaphore);
        state.semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence: vk::Fence = state.create(Kind::Fence)?;
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.fences.get(&fence) == Some(&FenceState::Pending) {
            state.violation(format!("fence {:?} destroyed while pending", fence));
        }
        state.release(fence, Kind::Fence);
        state.fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitFence(fence));
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                state.signal_fence(fence);
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                state.violation(format!("waited on {:?} which can never signal", fence));
                Err(vk::Result::TIMEOUT)
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetFence(fence));
        if state.fences.get(&fence) == Some(&FenceState::Pending) {
            state.violation(format!("reset {:?} while pending", fence));
        }
        state.fences.insert(fence, FenceState::Unsignaled);
        Ok(())
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state.lock();

        let mut all_buffers = Vec::new();
        for submit in submits {
            let record = unsafe {
                SubmitRecord {
                    command_buffers: raw_slice(submit.p_command_buffers, submit.command_buffer_count)
                        .to_vec(),
                    wait_semaphores: raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count)
                        .to_vec(),
                    wait_stages: raw_slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count)
                        .to_vec(),
                    signal_semaphores: raw_slice(
                        submit.p_signal_semaphores,
                        submit.signal_semaphore_count,
                    )
                    .to_vec(),
                    fence,
                }
            };

            for semaphore in &record.wait_semaphores {
                if state.semaphores.get(semaphore) != Some(&true) {
                    state.violation(format!("submit waits on unsignaled {:?}", semaphore));
                }
                state.semaphores.insert(*semaphore, false);
            }
            for semaphore in &record.signal_semaphores {
                state.semaphores.insert(*semaphore, true);
            }
            for &cmd in &record.command_buffers {
                if state.cmd_is_pending(cmd) {
                    state.violation(format!("submitted {:?} while still pending", cmd));
                }
                state.execute(cmd);
            }
            all_buffers.extend_from_slice(&record.command_buffers);
            state.submits.push(record);
        }
        state.calls.push(Call::Submit(all_buffers.clone()));

        if fence != vk::Fence::null() {
            match state.fences.get(&fence).copied() {
                Some(FenceState::Unsignaled) => {}
                other => state.violation(format!("submit with fence {:?} in {:?}", fence, other)),
            }
            state.fences.insert(fence, FenceState::Pending);
        }
        state.in_flight.push(InFlight {
            command_buffers: all_buffers,
            fence,
        });
        let fenced = state
            .in_flight
            .iter()
            .filter(|work| work.fence != vk::Fence::null())
            .count();
        state.max_in_flight = state.max_in_flight.max(fenced);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::QueueWaitIdle);
        state.drain();
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        self.state.lock().create(Kind::ShaderModule)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().release(module, Kind::ShaderModule);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        self.state.lock().create(Kind::RenderPass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        let in_use = state
            .framebuffers
            .values()
            .any(|fb| fb.render_pass == render_pass);
        if in_use {
            state.violation(format!(
                "render pass {:?} destroyed before its framebuffers",
                render_pass
            ));
        }
        state.release(render_pass, Kind::RenderPass);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        self.state.lock().create(Kind::PipelineLayout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().release(layout, Kind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.state.lock();
        if info.render_pass == vk::RenderPass::null() || info.layout == vk::PipelineLayout::null() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        state.create(Kind::Pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().release(pipeline, Kind::Pipeline);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) }.to_vec();
        for view in &attachments {
            if !state.views.contains_key(view) {
                state.violation(format!("framebuffer attaches dead view {:?}", view));
            }
        }
        let framebuffer: vk::Framebuffer = state.create(Kind::Framebuffer)?;
        state.framebuffers.insert(
            framebuffer,
            FramebufferRecord {
                render_pass: info.render_pass,
                attachments,
                extent: vk::Extent2D {
                    width: info.width,
                    height: info.height,
                },
            },
        );
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.calls.push(Call::DestroyFramebuffer);
        state.release(framebuffer, Kind::Framebuffer);
        state.framebuffers.remove(&framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VkResult<vk::DescriptorSetLayout> {
        self.state.lock().create(Kind::DescriptorSetLayout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().release(layout, Kind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo,
    ) -> VkResult<vk::DescriptorPool> {
        self.state.lock().create(Kind::DescriptorPool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().release(pool, Kind::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        if !state.live.contains_key(&info.descriptor_pool.as_raw()) {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        // Sets are owned by their pool and not tracked individually
        let sets = (0..info.descriptor_set_count)
            .map(|_| {
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(state.next_handle)
            })
            .collect();
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.state.lock().descriptor_writes += writes.len();
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.state.lock().surface
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.lock().capabilities)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.lock().surface_formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.lock().present_modes.clone())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateSwapchain);
        if info.image_extent.width == 0 || info.image_extent.height == 0 {
            state.violation("swapchain created with zero-area extent".to_string());
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let swapchain: vk::SwapchainKHR = state.create(Kind::Swapchain)?;
        let images = (0..info.min_image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        let record = SwapchainRecord {
            handle: swapchain,
            extent: info.image_extent,
            format: info.image_format,
            color_space: info.image_color_space,
            present_mode: info.present_mode,
            min_image_count: info.min_image_count,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices: unsafe {
                raw_slice(info.p_queue_family_indices, info.queue_family_index_count)
            }
            .to_vec(),
            images,
        };
        state.swapchain_history.push(record.clone());
        state.swapchains.insert(swapchain, record);
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.calls.push(Call::DestroySwapchain);
        if let Some(record) = state.swapchains.remove(&swapchain) {
            let viewed = state
                .views
                .values()
                .any(|image| record.images.contains(image));
            if viewed {
                state.violation(format!("swapchain {:?} destroyed before its views", swapchain));
            }
        }
        state.release(swapchain, Kind::Swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|record| record.images.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.calls.push(Call::Acquire);
        let Some(image_count) = state
            .swapchains
            .get(&swapchain)
            .map(|record| record.images.len() as u32)
        else {
            state.violation(format!("acquire on dead swapchain {:?}", swapchain));
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };

        let script = state.acquire_script.pop_front().unwrap_or_else(|| {
            let index = state.next_image % image_count;
            AcquireScript::Image(index)
        });
        let (index, suboptimal) = match script {
            AcquireScript::Image(index) => (index, false),
            AcquireScript::Suboptimal(index) => (index, true),
            AcquireScript::OutOfDate => return Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            AcquireScript::Error(result) => return Err(result),
        };

        if state.semaphores.get(&semaphore) == Some(&true) {
            state.violation(format!("acquire into already signaled {:?}", semaphore));
        }
        state.semaphores.insert(semaphore, true);
        state.next_image = index + 1;
        Ok((index, suboptimal))
    }

    fn queue_present(&self, _queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        let mut state = self.state.lock();
        let waits = unsafe { raw_slice(info.p_wait_semaphores, info.wait_semaphore_count) }.to_vec();
        let indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) }.to_vec();
        state
            .calls
            .push(Call::Present(indices.first().copied().unwrap_or(u32::MAX)));
        for semaphore in waits {
            if state.semaphores.get(&semaphore) != Some(&true) {
                state.violation(format!("present waits on unsignaled {:?}", semaphore));
            }
            state.semaphores.insert(semaphore, false);
        }
        match state
            .present_script
            .pop_front()
            .unwrap_or(PresentScript::Success)
        {
            PresentScript::Success => Ok(false),
            PresentScript::Suboptimal => Ok(true),
            PresentScript::OutOfDate => Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            PresentScript::Error(result) => Err(result),
        }
    }
}
