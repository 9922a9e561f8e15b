// Error taxonomy for the frame engine
//
// Swapchain out-of-date/suboptimal never shows up here: those are ordinary
// status values (AcquireResult, PresentResult, DrawFrameResult).
// Everything in this enum is fatal to rendering.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// No memory type satisfies the requested property mask
    #[error("no memory type with properties {required:?} is available")]
    Allocation { required: vk::MemoryPropertyFlags },

    /// A create/allocate/bind call was rejected by the driver
    #[error("failed to create {resource}: {result}")]
    ResourceCreation {
        resource: &'static str,
        result: vk::Result,
    },

    /// Programmer error: the barrier table has no entry for this pairing
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("none of the candidate formats support the required features")]
    UnsupportedFormat,

    #[error("texture data is {actual} bytes, expected {expected}")]
    InvalidTextureData { expected: usize, actual: usize },

    /// Vulkan buffers must have a non-zero size
    #[error("cannot create an empty {0}")]
    EmptyBuffer(&'static str),

    #[error("frames in flight must be between 1 and {max}, got {requested}")]
    InvalidFrameCount { requested: usize, max: usize },

    /// The renderer holds fewer per-frame resources than there are slots
    #[error("renderer has {renderer_slots} frame slots but {frames_in_flight} frames are in flight")]
    FrameSlotMismatch {
        frames_in_flight: usize,
        renderer_slots: usize,
    },

    #[error("frame slot {slot} is out of range ({available} slots)")]
    FrameSlotOutOfRange { slot: usize, available: usize },

    /// Surface reports zero formats or zero present modes
    #[error("presentation surface lost (no formats or present modes)")]
    SurfaceLost,

    /// Surface format changed so the render pass no longer matches
    #[error("surface format changed from {old:?} to {new:?}; render pass is incompatible")]
    SurfaceFormatChanged { old: vk::Format, new: vk::Format },

    #[error("presentation failed: {0}")]
    PresentationFailure(vk::Result),

    /// Fence wait, submission or idle wait returned an unexpected code
    #[error("device error during {operation}: {result}")]
    Device {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Public entry point used after explicit teardown
    #[error("{0} used after it was torn down")]
    TornDown(&'static str),
}

impl RenderError {
    pub(crate) fn creation(resource: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| RenderError::ResourceCreation { resource, result }
    }

    pub(crate) fn device(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| RenderError::Device { operation, result }
    }

    pub(crate) fn slot_out_of_range(slot: usize, available: usize) -> Self {
        RenderError::FrameSlotOutOfRange { slot, available }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
