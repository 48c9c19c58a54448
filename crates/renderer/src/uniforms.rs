//! Per-frame uniform block read by the triangle shader.

use std::f64::consts::TAU;
use std::time::Duration;

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Triangle spin rate.
pub const SPIN_RADIANS_PER_SECOND: f64 = 0.5;

/// Matches `FrameUniforms` at set 0, binding 0 in `triangle.vert` (std140).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// `(cos, sin)` of the spin angle.
    pub rotation: [f32; 2],
    /// Height over width, so the triangle keeps its shape on wide windows.
    pub inv_aspect: f32,
    /// Seconds since the context was created.
    pub elapsed: f32,
}

impl FrameUniforms {
    /// Uniforms for a frame drawn `elapsed` after start into `extent`.
    pub fn new(elapsed: Duration, extent: vk::Extent2D) -> Self {
        let secs = elapsed.as_secs_f64();
        // Reduce in f64 so the angle stays precise on long runs
        let angle = (secs * SPIN_RADIANS_PER_SECOND).rem_euclid(TAU);

        let inv_aspect = if extent.width == 0 || extent.height == 0 {
            1.0
        } else {
            extent.height as f32 / extent.width as f32
        };

        Self {
            rotation: [angle.cos() as f32, angle.sin() as f32],
            inv_aspect,
            elapsed: secs as f32,
        }
    }

    /// Buffer size for one slot.
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;
}
