// vk-frames - frame synchronization and swapchain lifecycle on Vulkan
//
// Layers, leaves first:
//   backend  - device seam, resource wrappers, swapchain, pipeline
//   render   - FrameCoordinator and the demo scene it drives
//
// Every GPU-owning type is torn down with an explicit destroy() in
// dependency order; see FrameCoordinator::destroy.

pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod render;

pub use ash::vk;
pub use error::{RenderError, Result};
