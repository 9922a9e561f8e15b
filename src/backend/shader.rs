// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL in
// shaders/ to `<name>.<stage>.spv`; this module reads those files and wraps
// them in shader modules.

use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use ash::vk;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// `<dir>/<name>.<stage>.spv`
pub fn shader_path(dir: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    dir.join(format!("{}.{}.spv", name, stage.extension()))
}

/// Read SPIR-V words from disk. Missing, truncated or misaligned files fail.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_error = |source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_error)?;
    // Validates size and magic number, handles word alignment
    ash::util::read_spv(&mut file).map_err(shader_error)
}

/// Load SPIR-V words and create a shader module
pub fn create_shader_module<G: Gpu>(gpu: &G, code: &[u32]) -> Result<vk::ShaderModule> {
    gpu.create_shader_module(code)
        .map_err(RenderError::creation("shader module"))
}
