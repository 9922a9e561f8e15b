// Model/view/projection uniform block

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Uniform block at binding 0. Three column-major mat4s, which already
/// satisfy std140 alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MvpTransforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl MvpTransforms {
    pub const IDENTITY: Self = Self {
        model: Mat4::IDENTITY,
        view: Mat4::IDENTITY,
        proj: Mat4::IDENTITY,
    };

    /// Geometry spinning 90 degrees per second about Z, seen from (2, 2, 2)
    pub fn spinning(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        Self {
            model,
            view,
            proj: projection(extent),
        }
    }
}

/// 45 degree perspective with depth in [0, 1] and Y pointing down, as
/// Vulkan clip space expects
pub fn projection(extent: vk::Extent2D) -> Mat4 {
    let aspect = if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    };
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    proj
}
