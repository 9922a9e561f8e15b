// Buffer utilities for vertex, index, and uniform buffers
//
// Every buffer owns exactly one dedicated memory allocation, picked by
// querying the device's memory types. Two flavours:
// - StagedBuffer: device-local, filled once through a staging copy
// - WritableDirectBuffer: host-visible + coherent, mapped for its whole life

use crate::backend::command::UploadContext;
use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;

const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Find a suitable memory type index
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required);
            has_type && has_properties
        })
        .ok_or(RenderError::Allocation { required })
}

/// Allocate dedicated memory for `requirements` from a type with `properties`
pub(crate) fn allocate_dedicated<G: Gpu>(
    gpu: &G,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    resource: &'static str,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &gpu.memory_properties(),
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    gpu.allocate_memory(&alloc_info)
        .map_err(RenderError::creation(resource))
}

/// Copy `bytes` to the start of host-visible `memory`
pub(crate) fn write_bytes<G: Gpu>(gpu: &G, memory: vk::DeviceMemory, bytes: &[u8]) -> Result<()> {
    let ptr = gpu
        .map_memory(memory, bytes.len() as vk::DeviceSize)
        .map_err(RenderError::device("map staging memory"))?;
    unsafe {
        ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    gpu.unmap_memory(memory);
    Ok(())
}

/// Buffer + its memory, without lifecycle tracking. Internal building block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl RawBuffer {
    /// Helper to create a GPU buffer with specified usage and memory properties
    pub fn new<G: Gpu>(
        gpu: &G,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        resource: &'static str,
    ) -> Result<Self> {
        // Zero-sized buffers are invalid usage, not a driver error
        if size == 0 {
            return Err(RenderError::EmptyBuffer(resource));
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = gpu
            .create_buffer(&buffer_info)
            .map_err(RenderError::creation(resource))?;

        let requirements = gpu.buffer_memory_requirements(buffer);
        let memory = match allocate_dedicated(gpu, requirements, properties, resource) {
            Ok(memory) => memory,
            Err(err) => {
                gpu.destroy_buffer(buffer);
                return Err(err);
            }
        };

        if let Err(result) = gpu.bind_buffer_memory(buffer, memory) {
            gpu.destroy_buffer(buffer);
            gpu.free_memory(memory);
            return Err(RenderError::creation(resource)(result));
        }

        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_buffer(self.buffer);
        gpu.free_memory(self.memory);
    }
}

/// Host-visible staging buffer already holding `bytes`
pub(crate) fn create_staging<G: Gpu>(gpu: &G, bytes: &[u8]) -> Result<RawBuffer> {
    let staging = RawBuffer::new(
        gpu,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        HOST_COHERENT,
        "staging buffer",
    )?;
    if let Err(err) = write_bytes(gpu, staging.memory, bytes) {
        staging.destroy(gpu);
        return Err(err);
    }
    Ok(staging)
}

// ─────────────────────────────────────────────────────────────────────────
// StagedBuffer
// ─────────────────────────────────────────────────────────────────────────

/// Device-local buffer uploaded once through a staging copy.
///
/// The upload has completed by the time the constructor returns, so the
/// buffer can be bound in the next draw.
pub struct StagedBuffer {
    raw: RawBuffer,
    lifecycle: Lifecycle,
}

impl StagedBuffer {
    pub fn new<G: Gpu>(
        gpu: &G,
        upload: &UploadContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(RenderError::EmptyBuffer("staged buffer"));
        }
        let staging = create_staging(gpu, data)?;

        let device_local = match RawBuffer::new(
            gpu,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "device-local buffer",
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                staging.destroy(gpu);
                return Err(err);
            }
        };

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        let copied = upload.run(gpu, |cmd| {
            gpu.cmd_copy_buffer(cmd, staging.buffer, device_local.buffer, &[region]);
        });

        staging.destroy(gpu);
        if let Err(err) = copied {
            device_local.destroy(gpu);
            return Err(err);
        }

        log::debug!("Uploaded {} bytes to device-local buffer", data.len());

        Ok(Self {
            raw: device_local,
            lifecycle: Lifecycle::Active,
        })
    }

    /// Create a buffer and fill it with data
    pub fn from_slice<G: Gpu, T: Pod>(
        gpu: &G,
        upload: &UploadContext,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(gpu, upload, bytemuck::cast_slice(data), usage)
    }

    pub fn buffer(&self) -> vk::Buffer {
        debug_assert!(self.lifecycle.is_active(), "StagedBuffer used after destroy");
        self.raw.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.raw.size
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("StagedBuffer")?;
        self.raw.destroy(gpu);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for StagedBuffer {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("StagedBuffer");
    }
}

// ─────────────────────────────────────────────────────────────────────────
// WritableDirectBuffer
// ─────────────────────────────────────────────────────────────────────────

/// Persistently mapped host-coherent buffer holding exactly one `T`.
///
/// Writes are visible to later submissions without a flush. The caller must
/// not write while a submission that reads this buffer is still in flight.
pub struct WritableDirectBuffer<T: Pod> {
    raw: RawBuffer,
    mapped: *mut u8,
    lifecycle: Lifecycle,
    _marker: PhantomData<T>,
}

impl<T: Pod> WritableDirectBuffer<T> {
    pub fn new<G: Gpu>(gpu: &G, usage: vk::BufferUsageFlags, initial: &T) -> Result<Self> {
        let raw = RawBuffer::new(
            gpu,
            std::mem::size_of::<T>() as vk::DeviceSize,
            usage,
            HOST_COHERENT,
            "direct-write buffer",
        )?;

        let mapped = match gpu.map_memory(raw.memory, raw.size) {
            Ok(ptr) => ptr,
            Err(result) => {
                raw.destroy(gpu);
                return Err(RenderError::device("map direct-write buffer")(result));
            }
        };

        let mut buffer = Self {
            raw,
            mapped,
            lifecycle: Lifecycle::Active,
            _marker: PhantomData,
        };
        buffer.write_data(initial)?;
        Ok(buffer)
    }

    /// Overwrite the whole buffer with `data`
    pub fn write_data(&mut self, data: &T) -> Result<()> {
        self.lifecycle.ensure_active("WritableDirectBuffer")?;
        let bytes = bytemuck::bytes_of(data);
        // The mapping has no alignment guarantee for T, so copy bytes
        unsafe {
            self.mapped
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
        Ok(())
    }

    pub fn buffer(&self) -> vk::Buffer {
        debug_assert!(self.lifecycle.is_active(), "WritableDirectBuffer used after destroy");
        self.raw.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.raw.size
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("WritableDirectBuffer")?;
        gpu.unmap_memory(self.raw.memory);
        self.mapped = std::ptr::null_mut();
        self.raw.destroy(gpu);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl<T: Pod> Drop for WritableDirectBuffer<T> {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("WritableDirectBuffer");
    }
}
