// Per-frame descriptor sets
//
// One set per frame slot:
// - binding 0: the slot's transform uniform buffer (vertex stage)
// - binding 1: texture + sampler (fragment stage)
//
// Each slot gets its own set so updating slot i never touches a set that an
// in-flight frame is still reading.

use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use crate::render::frame::MAX_FRAMES_IN_FLIGHT;
use ash::vk;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

pub fn create_frame_set_layout<G: Gpu>(gpu: &G) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    gpu.create_descriptor_set_layout(&layout_info)
        .map_err(RenderError::creation("descriptor set layout"))
}

pub struct FrameDescriptorSets {
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    lifecycle: Lifecycle,
}

impl FrameDescriptorSets {
    /// `frames` must be in 1..=MAX_FRAMES_IN_FLIGHT; a pool with no sets is invalid
    pub fn new<G: Gpu>(gpu: &G, layout: vk::DescriptorSetLayout, frames: usize) -> Result<Self> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames) {
            return Err(RenderError::InvalidFrameCount {
                requested: frames,
                max: MAX_FRAMES_IN_FLIGHT,
            });
        }
        let count = frames as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);

        let pool = gpu
            .create_descriptor_pool(&pool_info)
            .map_err(RenderError::creation("descriptor pool"))?;

        let layouts = vec![layout; frames];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = match gpu.allocate_descriptor_sets(&alloc_info) {
            Ok(sets) => sets,
            Err(result) => {
                gpu.destroy_descriptor_pool(pool);
                return Err(RenderError::creation("descriptor sets")(result));
            }
        };

        Ok(Self {
            pool,
            sets,
            lifecycle: Lifecycle::Active,
        })
    }

    /// Point slot `slot`'s set at its uniform buffer and the shared texture
    pub fn write<G: Gpu>(
        &self,
        gpu: &G,
        slot: usize,
        uniform: vk::Buffer,
        uniform_size: vk::DeviceSize,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        self.lifecycle.ensure_active("FrameDescriptorSets")?;
        let set = self.set(slot)?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform,
            offset: 0,
            range: uniform_size,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        gpu.update_descriptor_sets(&writes);
        Ok(())
    }

    pub fn set(&self, slot: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(slot)
            .copied()
            .ok_or_else(|| RenderError::slot_out_of_range(slot, self.sets.len()))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Sets are freed with the pool
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("FrameDescriptorSets")?;
        gpu.destroy_descriptor_pool(self.pool);
        self.sets.clear();
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for FrameDescriptorSets {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("FrameDescriptorSets");
    }
}
