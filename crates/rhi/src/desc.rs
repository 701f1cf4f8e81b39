//! Creation descriptions for device objects.

use crate::barrier::ResourceState;
use crate::shader::ShaderBytecode;
use crate::types::{BufferId, Format, RootSignatureId, VertexLayout};

/// Constant buffer views must be sized in multiples of this many bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Round a constant buffer size up to [`CONSTANT_BUFFER_ALIGNMENT`].
pub fn align_constant_buffer_size(size: u64) -> u64 {
    size.div_ceil(CONSTANT_BUFFER_ALIGNMENT) * CONSTANT_BUFFER_ALIGNMENT
}

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// CPU-visible, persistently mapped.
    Upload,
    /// Device-local; filled by GPU copies.
    DeviceLocal,
}

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which affects backend usage
/// flags and the default memory placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Constant buffer - per-frame shader constants
    Uniform,
    /// Storage buffer - read/write from shaders
    Storage,
    /// Staging buffer - CPU-written source for copies
    Staging,
}

impl BufferUsage {
    /// Default memory placement for this usage.
    pub fn default_memory(self) -> MemoryKind {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryKind::Upload,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryKind::Upload,
            BufferUsage::Storage => MemoryKind::DeviceLocal,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Description of a buffer to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryKind,
    pub initial_state: ResourceState,
}

impl BufferDesc {
    /// A buffer in the usage's default memory. Upload buffers start in
    /// `GenericRead`, device-local ones in `CopyDest`.
    pub fn new(label: impl Into<String>, usage: BufferUsage, size: u64) -> Self {
        let memory = usage.default_memory();
        Self {
            label: label.into(),
            size,
            usage,
            memory,
            initial_state: Self::state_for(memory),
        }
    }

    /// Move the buffer to another memory kind (and its matching initial state).
    pub fn with_memory(mut self, memory: MemoryKind) -> Self {
        self.memory = memory;
        self.initial_state = Self::state_for(memory);
        self
    }

    fn state_for(memory: MemoryKind) -> ResourceState {
        match memory {
            MemoryKind::Upload => ResourceState::GenericRead,
            MemoryKind::DeviceLocal => ResourceState::CopyDest,
        }
    }
}

/// Shader stages a root parameter is visible to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShaderVisibility {
    #[default]
    All,
    Vertex,
    Pixel,
}

/// Kind of view a descriptor holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
}

/// One slot of a root signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootParameter {
    /// A constant buffer bound directly with `set_root_constant_buffer`.
    ConstantBuffer { visibility: ShaderVisibility },
    /// A single-descriptor table bound with `set_descriptor_table`.
    DescriptorTable {
        kind: DescriptorKind,
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    pub fn descriptor_kind(self) -> DescriptorKind {
        match self {
            RootParameter::ConstantBuffer { .. } => DescriptorKind::ConstantBuffer,
            RootParameter::DescriptorTable { kind, .. } => kind,
        }
    }

    pub fn visibility(self) -> ShaderVisibility {
        match self {
            RootParameter::ConstantBuffer { visibility }
            | RootParameter::DescriptorTable { visibility, .. } => visibility,
        }
    }
}

/// Binding layout of a pipeline. Slot `n` is `parameters[n]`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RootSignatureDesc {
    pub label: String,
    pub parameters: Vec<RootParameter>,
}

/// A buffer view placed in a descriptor table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceView {
    ConstantBuffer { buffer: BufferId, size: u64 },
    ShaderResource { buffer: BufferId, size: u64 },
    UnorderedAccess { buffer: BufferId, size: u64 },
}

impl ResourceView {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            ResourceView::ConstantBuffer { .. } => DescriptorKind::ConstantBuffer,
            ResourceView::ShaderResource { .. } => DescriptorKind::ShaderResource,
            ResourceView::UnorderedAccess { .. } => DescriptorKind::UnorderedAccess,
        }
    }

    pub fn buffer(&self) -> BufferId {
        match *self {
            ResourceView::ConstantBuffer { buffer, .. }
            | ResourceView::ShaderResource { buffer, .. }
            | ResourceView::UnorderedAccess { buffer, .. } => buffer,
        }
    }

    pub fn size(&self) -> u64 {
        match *self {
            ResourceView::ConstantBuffer { size, .. }
            | ResourceView::ShaderResource { size, .. }
            | ResourceView::UnorderedAccess { size, .. } => size,
        }
    }
}

/// Depth comparison function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompareOp {
    Less,
    #[default]
    LessEqual,
    Always,
}

/// Triangle culling mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Description of a graphics pipeline state object.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc<'a> {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub vertex_shader: &'a ShaderBytecode,
    pub pixel_shader: &'a ShaderBytecode,
    pub vertex_layout: VertexLayout,
    pub color_format: Format,
    pub depth_format: Option<Format>,
    pub depth_compare: CompareOp,
    pub cull_mode: CullMode,
}

/// Description of a compute pipeline state object.
#[derive(Clone, Debug)]
pub struct ComputePipelineDesc<'a> {
    pub label: String,
    pub root_signature: RootSignatureId,
    pub shader: &'a ShaderBytecode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(align_constant_buffer_size(1), 256);
        assert_eq!(align_constant_buffer_size(256), 256);
        assert_eq!(align_constant_buffer_size(257), 512);
        assert_eq!(align_constant_buffer_size(0), 0);
    }

    #[test]
    fn test_buffer_desc_initial_state_follows_memory() {
        let upload = BufferDesc::new("cb", BufferUsage::Uniform, 64);
        assert_eq!(upload.memory, MemoryKind::Upload);
        assert_eq!(upload.initial_state, ResourceState::GenericRead);

        let device = BufferDesc::new("vb", BufferUsage::Vertex, 64).with_memory(MemoryKind::DeviceLocal);
        assert_eq!(device.initial_state, ResourceState::CopyDest);

        let storage = BufferDesc::new("volume", BufferUsage::Storage, 64);
        assert_eq!(storage.memory, MemoryKind::DeviceLocal);
    }

    #[test]
    fn test_root_parameter_accessors() {
        let cbv = RootParameter::ConstantBuffer {
            visibility: ShaderVisibility::Vertex,
        };
        assert_eq!(cbv.descriptor_kind(), DescriptorKind::ConstantBuffer);
        assert_eq!(cbv.visibility(), ShaderVisibility::Vertex);

        let uav = RootParameter::DescriptorTable {
            kind: DescriptorKind::UnorderedAccess,
            visibility: ShaderVisibility::All,
        };
        assert_eq!(uav.descriptor_kind(), DescriptorKind::UnorderedAccess);
    }
}
