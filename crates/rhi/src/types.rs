//! Backend-neutral value types shared by recorders, devices and samples.

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Raw index into the owning device's registry.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// A GPU buffer created by [`crate::GpuDevice::create_buffer`].
    BufferId
);
define_id!(
    /// A depth buffer created by [`crate::GpuDevice::create_depth_buffer`].
    DepthBufferId
);
define_id!(
    /// A root signature (binding layout).
    RootSignatureId
);
define_id!(
    /// A graphics or compute pipeline state object.
    PipelineId
);
define_id!(
    /// A shader-visible descriptor heap.
    DescriptorHeapId
);
define_id!(
    /// A descriptor table allocated from a heap.
    DescriptorTableId
);

/// Workload class of a command queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

impl QueueKind {
    /// Returns a human-readable name for the queue kind.
    pub fn name(self) -> &'static str {
        match self {
            QueueKind::Graphics => "graphics",
            QueueKind::Compute => "compute",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline bind point a root signature or descriptor table applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Two-dimensional size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero (e.g. a minimized window).
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height.
    pub fn aspect_ratio(self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Viewport transform, depth range included.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-target viewport with a `[0, 1]` depth range.
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels, right/bottom exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    /// Scissor covering the whole target.
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            left: 0,
            top: 0,
            right: extent.width as i32,
            bottom: extent.height as i32,
        }
    }
}

/// Texture and attachment formats used by the samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba16Float,
    D32Float,
}

impl Format {
    /// True for depth formats.
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float)
    }
}

/// Width of the indices in an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IndexFormat {
    #[default]
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Per-vertex attribute formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// A single vertex attribute at a shader location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Layout of an interleaved vertex buffer.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Builds a tightly packed layout from attribute formats, assigning
    /// locations and offsets in order.
    pub fn packed(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, &format)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();
        Self {
            stride: offset,
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_vertex_layout() {
        let layout = VertexLayout::packed(&[VertexFormat::Float32x3, VertexFormat::Float32x3]);
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].location, 1);
    }

    #[test]
    fn test_extent_helpers() {
        let extent = Extent2D::new(1280, 720);
        assert!(!extent.is_empty());
        assert!((extent.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);
        assert!(Extent2D::new(0, 720).is_empty());
    }

    #[test]
    fn test_viewport_and_scissor_cover_target() {
        let extent = Extent2D::new(800, 600);
        let viewport = Viewport::from_extent(extent);
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.max_depth, 1.0);

        let scissor = ScissorRect::from_extent(extent);
        assert_eq!((scissor.right, scissor.bottom), (800, 600));
    }

    #[test]
    fn test_queue_kind_display() {
        assert_eq!(QueueKind::Graphics.to_string(), "graphics");
        assert_eq!(QueueKind::Compute.to_string(), "compute");
    }
}
