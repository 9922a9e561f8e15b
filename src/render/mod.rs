// Render module - frame-level orchestration on top of the backend

pub mod frame;
pub mod mesh;
pub mod scene;
pub mod transforms;

pub use frame::{DrawFrameResult, FrameCoordinator, FrameRenderer, FrameTarget};
pub use mesh::{RenderableMesh, Vertex};
pub use scene::Scene;
pub use transforms::MvpTransforms;
