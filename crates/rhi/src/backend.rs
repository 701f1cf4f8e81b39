//! Traits a GPU backend implements.
//!
//! The frame orchestration code is written against these traits only. Two
//! implementations live in this crate: [`crate::vulkan`] for real hardware
//! and [`crate::headless`], a software timeline used by tests.

use crate::command::Command;
use crate::context::DeviceContext;
use crate::desc::{
    BufferDesc, ComputePipelineDesc, GraphicsPipelineDesc, ResourceView, RootSignatureDesc,
};
use crate::error::RhiResult;
use crate::sync::FenceSignal;
use crate::types::{
    BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, Extent2D, Format, PipelineId,
    QueueKind, RootSignatureId,
};

/// Parameters for creating a device context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextDesc {
    /// Label used in logs and debug names.
    pub label: String,
    /// Initial swap chain size.
    pub extent: Extent2D,
    /// Number of swap chain images.
    pub buffer_count: u32,
    /// Preferred swap chain format.
    pub format: Format,
    /// Create a compute queue alongside the graphics queue.
    pub compute_queue: bool,
}

impl ContextDesc {
    pub fn new(label: impl Into<String>, extent: Extent2D, buffer_count: u32) -> Self {
        Self {
            label: label.into(),
            extent,
            buffer_count,
            format: Format::Bgra8Unorm,
            compute_queue: false,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_compute_queue(mut self) -> Self {
        self.compute_queue = true;
        self
    }
}

/// A queue's allocator and command buffer pair.
pub trait CommandEncoder: Send + 'static {
    /// Reclaim the allocator. Only called once the previous submission retired.
    fn reset(&mut self) -> RhiResult<()>;

    /// Translate a finished recording into backend commands.
    fn encode(&mut self, commands: &[Command]) -> RhiResult<()>;
}

/// Resource and pipeline factory.
pub trait GpuDevice: Send + 'static {
    type Encoder: CommandEncoder;

    /// Name of the selected adapter.
    fn adapter_name(&self) -> String;

    /// Create the encoder for a recorder on `queue`.
    fn create_encoder(&self, queue: QueueKind) -> RhiResult<Self::Encoder>;

    /// Create a buffer, optionally filled with `initial_data` (upload memory only).
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> RhiResult<BufferId>;

    /// Write into a persistently mapped upload buffer.
    ///
    /// The write is not ordered against the GPU; callers only write once the
    /// fence shows the previous reader finished.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Release a buffer. The GPU must no longer reference it, and views of it
    /// must not be bound again.
    fn destroy_buffer(&self, buffer: BufferId) -> RhiResult<()>;

    fn create_depth_buffer(&self, extent: Extent2D, format: Format) -> RhiResult<DepthBufferId>;

    /// Release a depth buffer. The GPU must no longer reference it.
    fn destroy_depth_buffer(&self, depth: DepthBufferId) -> RhiResult<()>;

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<RootSignatureId>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<PipelineId>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> RhiResult<PipelineId>;

    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapId>;

    /// Allocate a table holding `view`, laid out for `slot` of `root_signature`.
    fn create_descriptor_table(
        &self,
        heap: DescriptorHeapId,
        root_signature: RootSignatureId,
        slot: u32,
        view: &ResourceView,
    ) -> RhiResult<DescriptorTableId>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;
}

/// An ordered submission channel.
pub trait CommandQueue: Send + 'static {
    type Encoder;
    type Signal;

    fn kind(&self) -> QueueKind;

    /// Submit a closed recording.
    fn execute(&mut self, encoder: &Self::Encoder) -> RhiResult<()>;

    /// Write `value` into the fence once all prior work on this queue completes.
    fn signal(&mut self, fence: &Self::Signal, value: u64) -> RhiResult<()>;
}

/// The presentable image ring.
pub trait SwapChain: Send + 'static {
    fn buffer_count(&self) -> u32;

    /// Image the next frame must render into. Not guaranteed to advance
    /// sequentially; re-read after every present and resize.
    fn current_back_buffer_index(&self) -> u32;

    fn extent(&self) -> Extent2D;

    fn format(&self) -> Format;

    /// Queue the current image for presentation. Interval 0 presents
    /// immediately without waiting for vertical blank.
    fn present(&mut self, sync_interval: u32) -> RhiResult<()>;

    /// Recreate every image and view at a new size. The GPU must be idle.
    fn resize(&mut self, buffer_count: u32, extent: Extent2D) -> RhiResult<()>;
}

/// A complete GPU backend.
pub trait Backend: Sized + Send + 'static {
    type Device: GpuDevice<Encoder = Self::Encoder>;
    type Encoder: CommandEncoder;
    type Queue: CommandQueue<Encoder = Self::Encoder, Signal = Self::Signal>;
    type Signal: FenceSignal;
    type SwapChain: SwapChain;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Create the device, queues, fence and swap chain.
    fn into_context(self, desc: &ContextDesc) -> RhiResult<DeviceContext<Self>>;
}
