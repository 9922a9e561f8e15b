// Device images: sampled textures and depth attachments
//
// An Image owns its VkImage, one dedicated allocation and a single view.
// Layout changes go through a fixed transition table; anything outside it is
// a programmer error.

use crate::backend::buffer::{allocate_dedicated, create_staging};
use crate::backend::command::UploadContext;
use crate::backend::gpu::Gpu;
use crate::error::{RenderError, Result};
use crate::lifecycle::Lifecycle;
use ash::vk;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Everything needed to create an image, its memory and its view
#[derive(Debug, Clone, Copy)]
pub struct ImageProps {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_properties: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Access masks and stages for one supported layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for `old -> new`
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<LayoutTransition> {
    use vk::ImageLayout as L;

    let transition = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        // Depth reads happen in early fragment tests
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        _ => return Err(RenderError::UnsupportedTransition { old, new }),
    };
    Ok(transition)
}

/// Record an image barrier for a transition already looked up in the table
pub fn record_barrier<G: Gpu>(
    gpu: &G,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    transition: LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(single_subresource(aspect));

    gpu.cmd_image_barrier(cmd, transition.src_stage, transition.dst_stage, &barrier);
}

/// First candidate whose `tiling` features include all of `features`
pub fn find_supported_format<G: Gpu>(
    gpu: &G,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = gpu.format_properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or(RenderError::UnsupportedFormat)
}

pub fn find_depth_format<G: Gpu>(gpu: &G) -> Result<vk::Format> {
    find_supported_format(
        gpu,
        &DEPTH_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

fn single_subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Create a 2D view over a whole single-level image
pub(crate) fn create_view<G: Gpu>(
    gpu: &G,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    resource: &'static str,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(single_subresource(aspect));

    gpu.create_image_view(&view_info)
        .map_err(RenderError::creation(resource))
}

// ─────────────────────────────────────────────────────────────────────────
// Image
// ─────────────────────────────────────────────────────────────────────────

pub struct Image {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    props: ImageProps,
    layout: vk::ImageLayout,
    lifecycle: Lifecycle,
}

impl Image {
    pub fn new<G: Gpu>(gpu: &G, props: ImageProps) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: props.extent.width,
                height: props.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(props.format)
            .tiling(props.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(props.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = gpu
            .create_image(&image_info)
            .map_err(RenderError::creation("image"))?;

        let requirements = gpu.image_memory_requirements(image);
        let memory = match allocate_dedicated(gpu, requirements, props.memory_properties, "image memory") {
            Ok(memory) => memory,
            Err(err) => {
                gpu.destroy_image(image);
                return Err(err);
            }
        };

        if let Err(result) = gpu.bind_image_memory(image, memory) {
            gpu.destroy_image(image);
            gpu.free_memory(memory);
            return Err(RenderError::creation("image memory")(result));
        }

        let view = match create_view(gpu, image, props.format, props.aspect, "image view") {
            Ok(view) => view,
            Err(err) => {
                gpu.destroy_image(image);
                gpu.free_memory(memory);
                return Err(err);
            }
        };

        Ok(Self {
            image,
            memory,
            view,
            props,
            layout: vk::ImageLayout::UNDEFINED,
            lifecycle: Lifecycle::Active,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        debug_assert!(self.lifecycle.is_active(), "Image used after destroy");
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.props.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.props.extent
    }

    /// Layout as of the last completed transition
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Transition to `new` with a one-shot command and wait for it
    pub fn transition_layout<G: Gpu>(
        &mut self,
        gpu: &G,
        upload: &UploadContext,
        new: vk::ImageLayout,
    ) -> Result<()> {
        self.lifecycle.ensure_active("Image")?;
        let old = self.layout;
        let transition = layout_transition(old, new)?;
        let (image, aspect) = (self.image, self.props.aspect);

        upload.run(gpu, |cmd| {
            record_barrier(gpu, cmd, image, aspect, old, new, transition);
        })?;
        self.layout = new;
        Ok(())
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.lifecycle.ensure_active("Image")?;
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image);
        gpu.free_memory(self.memory);
        self.lifecycle.tear_down();
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.lifecycle.check_dropped("Image");
    }
}

// ─────────────────────────────────────────────────────────────────────────
// TextureImage
// ─────────────────────────────────────────────────────────────────────────

/// Tightly packed RGBA8 pixels, already decoded
#[derive(Debug, Clone, Copy)]
pub struct TexturePixels<'a> {
    width: u32,
    height: u32,
    rgba: &'a [u8],
}

impl<'a> TexturePixels<'a> {
    pub fn new(width: u32, height: u32, rgba: &'a [u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if expected == 0 || rgba.len() != expected {
            return Err(RenderError::InvalidTextureData {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.rgba
    }
}

/// Sampled texture, uploaded and in SHADER_READ_ONLY_OPTIMAL when returned
pub struct TextureImage {
    image: Image,
}

impl TextureImage {
    pub fn new<G: Gpu>(gpu: &G, upload: &UploadContext, pixels: &TexturePixels<'_>) -> Result<Self> {
        let staging = create_staging(gpu, pixels.bytes())?;

        let image = Image::new(
            gpu,
            ImageProps {
                extent: pixels.extent(),
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        );
        let mut image = match image {
            Ok(image) => image,
            Err(err) => {
                staging.destroy(gpu);
                return Err(err);
            }
        };

        let uploaded = Self::upload(gpu, upload, &mut image, staging.buffer, pixels.extent());
        staging.destroy(gpu);
        if let Err(err) = uploaded {
            image.destroy(gpu)?;
            return Err(err);
        }

        log::debug!(
            "Uploaded {}x{} texture",
            pixels.extent().width,
            pixels.extent().height
        );

        Ok(Self { image })
    }

    fn upload<G: Gpu>(
        gpu: &G,
        upload: &UploadContext,
        image: &mut Image,
        staging: vk::Buffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let to_transfer = layout_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let handle = image.handle();

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();

        upload.run(gpu, |cmd| {
            record_barrier(
                gpu,
                cmd,
                handle,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                to_transfer,
            );
            gpu.cmd_copy_buffer_to_image(
                cmd,
                staging,
                handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })?;
        image.layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;

        image.transition_layout(gpu, upload, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.image.destroy(gpu)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// DepthImage
// ─────────────────────────────────────────────────────────────────────────

/// Depth attachment sized to one swapchain generation.
///
/// Left in UNDEFINED: the render pass clears it and moves it to
/// DEPTH_STENCIL_ATTACHMENT_OPTIMAL on first use.
pub struct DepthImage {
    image: Image,
}

impl DepthImage {
    pub fn new<G: Gpu>(gpu: &G, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image = Image::new(
            gpu,
            ImageProps {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )?;
        Ok(Self { image })
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    pub fn has_stencil(&self) -> bool {
        has_stencil_component(self.image.format())
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.image.destroy(gpu)
    }
}
