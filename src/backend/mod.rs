// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Everything is generic over the Gpu seam so the
// same code runs against VulkanDevice and, in tests, MockGpu.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod gpu;
pub mod image;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub mod mock;

pub use buffer::{StagedBuffer, WritableDirectBuffer};
pub use command::UploadContext;
pub use device::VulkanDevice;
pub use gpu::{Gpu, QueueFamilyIndices};
pub use image::{DepthImage, Image, ImageProps, TextureImage, TexturePixels};
pub use pipeline::{GraphicsPipeline, PipelineDesc, VertexInput};
pub use sampler::{SamplerProps, TextureSampler};
pub use swapchain::{
    AcquireResult, PresentResult, SwapchainManager, SwapchainOptions, SwapchainStatus,
    SwapchainSupport,
};
pub use sync::FrameSlot;
