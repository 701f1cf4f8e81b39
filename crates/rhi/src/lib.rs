//! Render hardware interface.
//!
//! This crate holds the part of the framework that decides when GPU work may
//! be recorded, submitted and reused:
//! - Command recording with resource-state tracking ([`CommandRecorder`])
//! - The shared CPU/GPU fence ([`Fence`])
//! - The device context owning queues, fence and swap chain ([`DeviceContext`])
//! - Backend traits, with a Vulkan implementation ([`vulkan`]) and a
//!   deterministic software timeline for tests ([`headless`])

mod error;

pub mod backend;
pub mod barrier;
pub mod command;
pub mod context;
pub mod desc;
pub mod headless;
pub mod shader;
pub mod sync;
pub mod trace;
pub mod types;
pub mod vulkan;

pub use backend::{Backend, CommandEncoder, CommandQueue, ContextDesc, GpuDevice, SwapChain};
pub use barrier::{Barrier, ResourceHandle, ResourceState, StateChange};
pub use command::{Command, CommandRecorder, RecorderState, dispatch_grid};
pub use context::DeviceContext;
pub use desc::{
    BufferDesc, BufferUsage, CompareOp, ComputePipelineDesc, CullMode, DescriptorKind,
    GraphicsPipelineDesc, MemoryKind, ResourceView, RootParameter, RootSignatureDesc,
    ShaderVisibility, align_constant_buffer_size,
};
pub use error::{RhiError, RhiResult};
pub use shader::{ShaderBytecode, ShaderLoader, ShaderStage, SpirvDirectory};
pub use sync::{Fence, FenceSignal, Ticket};
pub use trace::TraceExt;
pub use types::{
    BindPoint, BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, Extent2D, Format,
    IndexFormat, PipelineId, QueueKind, RootSignatureId, ScissorRect, VertexAttribute,
    VertexFormat, VertexLayout, Viewport,
};

// Re-export ash types that backends and windowing code need
pub use ash::vk;
