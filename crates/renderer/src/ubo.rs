//! Vertex and constant buffer layouts shared with the shaders.
//!
//! These structures must match the GLSL declarations in `shaders/` exactly.
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{IVec4, Mat4, Vec3, Vec4};

/// Colored vertex of the rotating cube.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: Vec3,
    pub color: Vec3,
}

/// Position-only vertex of the volume's bounding cube.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionVertex {
    pub position: Vec3,
}

/// Constant buffer of the rotating cube (`set = 0`, vertex stage).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CubeConstants {
    /// World-view-projection matrix.
    pub wvp: Mat4,
}

impl Default for CubeConstants {
    fn default() -> Self {
        Self { wvp: Mat4::IDENTITY }
    }
}

/// Number of concentric color shells in the volume.
pub const SHELL_COLORS: usize = 6;

/// Constant buffer of the volumetric animation, read by both the compute and
/// the graphics pipelines.
///
/// # Memory Layout
///
/// - Offset 0: view-projection matrix (64 bytes)
/// - Offset 64: eye position (16 bytes)
/// - Offset 80: shell colors, `w` is the shell index (96 bytes)
/// - Offset 176: background color (16 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VolumeConstants {
    pub wvp: Mat4,
    pub view_pos: Vec4,
    pub col_val: [IVec4; SHELL_COLORS],
    pub bg_col: IVec4,
}

impl VolumeConstants {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl Default for VolumeConstants {
    fn default() -> Self {
        Self {
            wvp: Mat4::IDENTITY,
            view_pos: Vec4::ZERO,
            col_val: [
                IVec4::new(1, 0, 0, 0),
                IVec4::new(0, 1, 0, 1),
                IVec4::new(0, 0, 1, 2),
                IVec4::new(1, 1, 0, 3),
                IVec4::new(1, 0, 1, 4),
                IVec4::new(0, 1, 1, 5),
            ],
            bg_col: IVec4::splat(64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sizes() {
        assert_eq!(std::mem::size_of::<ColorVertex>(), 24);
        assert_eq!(std::mem::size_of::<PositionVertex>(), 12);
    }

    #[test]
    fn test_cube_constants_size() {
        assert_eq!(std::mem::size_of::<CubeConstants>(), 64);
    }

    #[test]
    fn test_volume_constants_size() {
        // Mat4 (64) + Vec4 (16) + 6 * IVec4 (96) + IVec4 (16) = 192 bytes
        assert_eq!(VolumeConstants::SIZE, 192);
        assert_eq!(std::mem::offset_of!(VolumeConstants, view_pos), 64);
        assert_eq!(std::mem::offset_of!(VolumeConstants, col_val), 80);
        assert_eq!(std::mem::offset_of!(VolumeConstants, bg_col), 176);
    }

    #[test]
    fn test_volume_constants_defaults() {
        let constants = VolumeConstants::default();
        for (index, color) in constants.col_val.iter().enumerate() {
            assert_eq!(color.w, index as i32);
        }
        assert_eq!(constants.bg_col, IVec4::splat(64));
    }

    #[test]
    fn test_constants_pod_zeroable() {
        let constants = VolumeConstants::default();
        let bytes: &[u8] = bytemuck::bytes_of(&constants);
        assert_eq!(bytes.len(), VolumeConstants::SIZE);

        let cube = CubeConstants::default();
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&cube));
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[5], 1.0);
    }
}
