// Texture sampler

use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;

#[derive(Debug, Clone, Copy)]
pub struct SamplerProps {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

impl Default for SamplerProps {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
        }
    }
}

/// Sampler with anisotropic filtering at the device limit
pub struct TextureSampler {
    sampler: vk::Sampler,
    lifecycle: Lifecycle,
}

impl TextureSampler {
    pub fn new<G: Gpu>(gpu: &G, props: SamplerProps) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(props.filter)
            .min_filter(props.filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(props.address_mode)
            .address_mode_v(props.address_mode)
            .address_mode_w(props.address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(true)
            .max_anisotropy(gpu.max_sampler_anisotropy())
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = gpu
            .create_sampler(&sampler_info)
            .map_err(RenderError::creation("texture sampler"))?;

        Ok(Self {
            sampler,
            lifecycle: Lifecycle::Active,
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        debug_assert!(self.lifecycle.is_active(), "TextureSampler used after destroy");
        self.sampler
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("TextureSampler")?;
        gpu.destroy_sampler(self.sampler);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for TextureSampler {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("TextureSampler");
    }
}
