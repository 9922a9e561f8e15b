// Demo scene - the FrameRenderer the binary draws
//
// Owns everything a frame binds: pipeline, mesh, texture + sampler, and one
// uniform buffer + descriptor set per frame slot.

use crate::backend::buffer::WritableDirectBuffer;
use crate::backend::command::UploadContext;
use crate::backend::descriptor::FrameDescriptorSets;
use crate::backend::gpu::Gpu;
use crate::backend::image::{TextureImage, TexturePixels};
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::sampler::{SamplerProps, TextureSampler};
use crate::error::{RenderError, Result};
use crate::render::frame::{FrameRenderer, FrameTarget, MAX_FRAMES_IN_FLIGHT};
use crate::render::mesh::{stacked_quads, RenderableMesh};
use crate::render::transforms::MvpTransforms;
use ash::vk;
use std::time::Instant;

const TEXTURE_SIZE: u32 = 64;
const CHECKER_CELLS: u32 = 8;

/// `size` x `size` RGBA checkerboard of `cells` x `cells` squares
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let value = if light { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

pub struct Scene {
    pipeline: GraphicsPipeline,
    mesh: RenderableMesh,
    texture: TextureImage,
    sampler: TextureSampler,
    uniforms: Vec<WritableDirectBuffer<MvpTransforms>>,
    descriptors: FrameDescriptorSets,
    started: Instant,
}

impl Scene {
    /// Takes ownership of `pipeline`; on failure it is destroyed along with
    /// everything built before the failing step
    pub fn new<G: Gpu>(
        gpu: &G,
        upload: &UploadContext,
        mut pipeline: GraphicsPipeline,
        frames_in_flight: usize,
    ) -> Result<Self> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight) {
            pipeline.destroy(gpu)?;
            return Err(RenderError::InvalidFrameCount {
                requested: frames_in_flight,
                max: MAX_FRAMES_IN_FLIGHT,
            });
        }

        let (vertices, indices) = stacked_quads();
        let mut mesh = RenderableMesh::new(gpu, upload, &vertices, &indices).or_else(|err| {
            pipeline.destroy(gpu)?;
            Err(err)
        })?;
        log::debug!("Mesh uploaded: {} indices", mesh.index_count());

        let pixels = checkerboard(TEXTURE_SIZE, CHECKER_CELLS);
        let mut texture = TexturePixels::new(TEXTURE_SIZE, TEXTURE_SIZE, &pixels)
            .and_then(|pixels| TextureImage::new(gpu, upload, &pixels))
            .or_else(|err| {
                mesh.destroy(gpu)?;
                pipeline.destroy(gpu)?;
                Err(err)
            })?;

        let mut sampler = TextureSampler::new(gpu, SamplerProps::default()).or_else(|err| {
            texture.destroy(gpu)?;
            mesh.destroy(gpu)?;
            pipeline.destroy(gpu)?;
            Err(err)
        })?;

        let slots = Self::create_slots(
            gpu,
            pipeline.set_layout(),
            frames_in_flight,
            texture.view(),
            sampler.handle(),
        );
        let (uniforms, descriptors) = match slots {
            Ok(slots) => slots,
            Err(err) => {
                sampler.destroy(gpu)?;
                texture.destroy(gpu)?;
                mesh.destroy(gpu)?;
                pipeline.destroy(gpu)?;
                return Err(err);
            }
        };

        log::info!("Scene ready ({} frame slots)", uniforms.len());
        Ok(Self {
            pipeline,
            mesh,
            texture,
            sampler,
            uniforms,
            descriptors,
            started: Instant::now(),
        })
    }

    /// One uniform buffer and descriptor set per frame slot
    fn create_slots<G: Gpu>(
        gpu: &G,
        set_layout: vk::DescriptorSetLayout,
        frames_in_flight: usize,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<(Vec<WritableDirectBuffer<MvpTransforms>>, FrameDescriptorSets)> {
        let mut uniforms = Vec::with_capacity(frames_in_flight);
        let release = |uniforms: &mut Vec<WritableDirectBuffer<MvpTransforms>>| -> Result<()> {
            for uniform in uniforms.iter_mut() {
                uniform.destroy(gpu)?;
            }
            Ok(())
        };

        for _ in 0..frames_in_flight {
            match WritableDirectBuffer::new(
                gpu,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                &MvpTransforms::IDENTITY,
            ) {
                Ok(uniform) => uniforms.push(uniform),
                Err(err) => {
                    release(&mut uniforms)?;
                    return Err(err);
                }
            }
        }

        let mut descriptors = match FrameDescriptorSets::new(gpu, set_layout, frames_in_flight) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                release(&mut uniforms)?;
                return Err(err);
            }
        };
        for (slot, uniform) in uniforms.iter().enumerate() {
            let written = descriptors.write(
                gpu,
                slot,
                uniform.buffer(),
                uniform.size(),
                texture_view,
                sampler,
            );
            if let Err(err) = written {
                descriptors.destroy(gpu)?;
                release(&mut uniforms)?;
                return Err(err);
            }
        }
        Ok((uniforms, descriptors))
    }

    pub fn pipeline(&self) -> &GraphicsPipeline {
        &self.pipeline
    }

    pub fn mesh(&self) -> &RenderableMesh {
        &self.mesh
    }

    pub fn texture(&self) -> &TextureImage {
        &self.texture
    }

    pub fn uniform_buffer(&self, slot: usize) -> Option<vk::Buffer> {
        self.uniforms.get(slot).map(|uniform| uniform.buffer())
    }

    pub fn slot_count(&self) -> usize {
        self.uniforms.len()
    }
}

impl<G: Gpu> FrameRenderer<G> for Scene {
    fn render_pass(&self) -> vk::RenderPass {
        self.pipeline.render_pass()
    }

    fn slot_count(&self) -> usize {
        self.uniforms.len()
    }

    fn update_frame(&mut self, _gpu: &G, slot: usize, extent: vk::Extent2D) -> Result<()> {
        let available = self.uniforms.len();
        let uniform = self
            .uniforms
            .get_mut(slot)
            .ok_or_else(|| RenderError::slot_out_of_range(slot, available))?;
        let transforms = MvpTransforms::spinning(self.started.elapsed().as_secs_f32(), extent);
        uniform.write_data(&transforms)
    }

    fn record(
        &self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        target: &FrameTarget,
        slot: usize,
    ) -> Result<()> {
        let set = self.descriptors.set(slot)?;
        self.pipeline.record_command_buffer(
            gpu,
            cmd,
            target.framebuffer,
            target.extent,
            set,
            |cmd| self.mesh.draw(gpu, cmd),
        )
    }

    fn destroy_frame_resources(&mut self, gpu: &G) -> Result<()> {
        for uniform in &mut self.uniforms {
            uniform.destroy(gpu)?;
        }
        self.descriptors.destroy(gpu)?;
        self.sampler.destroy(gpu)?;
        self.texture.destroy(gpu)?;
        self.mesh.destroy(gpu)
    }

    fn destroy_pipeline(&mut self, gpu: &G) -> Result<()> {
        self.pipeline.destroy(gpu)
    }
}
