// Mesh data - vertices, indices and their GPU buffers

use crate::backend::buffer::StagedBuffer;
use crate::backend::command::UploadContext;
use crate::backend::gpu::Gpu;
use crate::backend::pipeline::VertexInput;
use crate::error::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    /// One interleaved binding; locations 0..=2 match the vertex shader
    pub fn input() -> VertexInput {
        VertexInput {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: offset_of!(Vertex, pos) as u32,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: offset_of!(Vertex, color) as u32,
                },
                vk::VertexInputAttributeDescription {
                    location: 2,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(Vertex, tex_coord) as u32,
                },
            ],
        }
    }
}

/// Two stacked textured quads, the upper one at z = 0 and the lower at
/// z = -0.5, so the depth test has something to do
pub fn stacked_quads() -> (Vec<Vertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(8);
    for z in [0.0, -0.5] {
        vertices.extend_from_slice(&[
            Vertex::new([-0.5, -0.5, z], [1.0, 0.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.5, -0.5, z], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex::new([0.5, 0.5, z], [0.0, 0.0, 1.0], [0.0, 1.0]),
            Vertex::new([-0.5, 0.5, z], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ]);
    }
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
    (vertices, indices)
}

/// Device-local vertex and u16 index buffers
pub struct RenderableMesh {
    vertices: StagedBuffer,
    indices: StagedBuffer,
    index_count: u32,
}

impl RenderableMesh {
    pub fn new<G: Gpu>(
        gpu: &G,
        upload: &UploadContext,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<Self> {
        let mut vertex_buffer =
            StagedBuffer::from_slice(gpu, upload, vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;

        let index_buffer =
            match StagedBuffer::from_slice(gpu, upload, indices, vk::BufferUsageFlags::INDEX_BUFFER) {
                Ok(buffer) => buffer,
                Err(err) => {
                    vertex_buffer.destroy(gpu)?;
                    return Err(err);
                }
            };

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.buffer()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.buffer()
    }

    /// Bind both buffers and draw every index once
    pub fn draw<G: Gpu>(&self, gpu: &G, cmd: vk::CommandBuffer) {
        gpu.cmd_bind_vertex_buffer(cmd, self.vertices.buffer());
        gpu.cmd_bind_index_buffer(cmd, self.indices.buffer(), vk::IndexType::UINT16);
        gpu.cmd_draw_indexed(cmd, self.index_count);
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.vertices.destroy(gpu)?;
        self.indices.destroy(gpu)
    }
}
