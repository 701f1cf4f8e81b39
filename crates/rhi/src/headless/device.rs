//! Headless device, encoder and queue.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use crate::backend::{CommandEncoder, CommandQueue, GpuDevice};
use crate::barrier::{ResourceHandle, ResourceState};
use crate::command::Command;
use crate::desc::{
    BufferDesc, ComputePipelineDesc, GraphicsPipelineDesc, MemoryKind, ResourceView,
    RootSignatureDesc,
};
use crate::error::{RhiError, RhiResult};
use crate::types::{
    BindPoint, BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, Extent2D, Format,
    PipelineId, QueueKind, RootSignatureId,
};

use super::timeline::{
    BufferRecord, HeadlessFence, HeapRecord, Job, PipelineRecord, Shared, TableRecord,
};

/// Headless device: a registry of buffers and pipeline objects.
pub struct HeadlessDevice {
    pub(crate) shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HeadlessDevice {
    pub(crate) fn new(shared: Arc<Shared>) -> RhiResult<Self> {
        let worker = if shared.config.threaded {
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name("headless-gpu".into())
                .spawn(move || worker_shared.run_worker())
                .map_err(|e| RhiError::InvalidState(format!("failed to spawn GPU thread: {e}")))?;
            Some(handle)
        } else {
            None
        };
        Ok(Self { shared, worker })
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!("Headless device destroyed");
    }
}

fn check_range(record: &BufferRecord, offset: u64, len: usize) -> RhiResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= record.desc.size => Ok(()),
        _ => Err(RhiError::InvalidState(format!(
            "write of {len} bytes at {offset} exceeds buffer '{}' ({} bytes)",
            record.desc.label, record.desc.size
        ))),
    }
}

impl GpuDevice for HeadlessDevice {
    type Encoder = HeadlessEncoder;

    fn adapter_name(&self) -> String {
        self.shared.config.adapter_name.clone()
    }

    fn create_encoder(&self, queue: QueueKind) -> RhiResult<Self::Encoder> {
        Ok(HeadlessEncoder {
            queue,
            recorded: Arc::new(Vec::new()),
        })
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> RhiResult<BufferId> {
        if desc.size == 0 {
            return Err(RhiError::InvalidState(format!("buffer '{}' has zero size", desc.label)));
        }
        let mut state = self.shared.lock()?;
        let mut record = BufferRecord {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
            released: false,
        };
        if let Some(data) = initial_data {
            if desc.memory != MemoryKind::Upload {
                return Err(RhiError::InvalidState(format!(
                    "buffer '{}' is device-local and cannot take initial data",
                    desc.label
                )));
            }
            check_range(&record, 0, data.len())?;
            record.data[..data.len()].copy_from_slice(data);
        }

        let id = BufferId(state.buffers.len() as u32);
        state.buffers.push(record);
        state.states.insert(ResourceHandle::Buffer(id), desc.initial_state);
        debug!("Created {} buffer '{}' ({} bytes)", desc.usage.name(), desc.label, desc.size);
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        let record = state.buffer_mut(buffer)?;
        if record.desc.memory != MemoryKind::Upload {
            return Err(RhiError::InvalidState(format!(
                "buffer '{}' is not CPU-visible",
                record.desc.label
            )));
        }
        check_range(record, offset, data.len())?;
        let start = offset as usize;
        record.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        if state.has_pending_jobs() {
            return Err(RhiError::InvalidState(format!(
                "{buffer:?} destroyed while GPU work is in flight"
            )));
        }
        let record = state.buffer_mut(buffer)?;
        record.released = true;
        record.data = Vec::new();
        debug!("Released buffer '{}'", record.desc.label);
        state.states.remove(&ResourceHandle::Buffer(buffer));
        Ok(())
    }

    fn create_depth_buffer(&self, extent: Extent2D, format: Format) -> RhiResult<DepthBufferId> {
        if !format.is_depth() {
            return Err(RhiError::InvalidState(format!("{format:?} is not a depth format")));
        }
        if extent.is_empty() {
            return Err(RhiError::InvalidState("depth buffer with empty extent".into()));
        }
        let mut state = self.shared.lock()?;
        let id = DepthBufferId(state.depth_buffers.len() as u32);
        state.depth_buffers.push(Some(extent));
        state.states.insert(ResourceHandle::Depth(id), ResourceState::DepthWrite);
        Ok(id)
    }

    fn destroy_depth_buffer(&self, depth: DepthBufferId) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        if state.has_pending_jobs() {
            return Err(RhiError::InvalidState(
                "depth buffer destroyed while GPU work is in flight".into(),
            ));
        }
        if !matches!(state.depth_buffers.get(depth.index()), Some(Some(_))) {
            return Err(RhiError::InvalidHandle(format!("{depth:?}")));
        }
        state.depth_buffers[depth.index()] = None;
        state.states.remove(&ResourceHandle::Depth(depth));
        Ok(())
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<RootSignatureId> {
        let mut state = self.shared.lock()?;
        let id = RootSignatureId(state.root_signatures.len() as u32);
        state.root_signatures.push(desc.clone());
        Ok(id)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<PipelineId> {
        let mut state = self.shared.lock()?;
        if state.root_signatures.get(desc.root_signature.index()).is_none() {
            return Err(RhiError::InvalidHandle(format!("{:?}", desc.root_signature)));
        }
        let id = PipelineId(state.pipelines.len() as u32);
        state.pipelines.push(PipelineRecord {
            bind_point: BindPoint::Graphics,
            root_signature: desc.root_signature,
        });
        Ok(id)
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> RhiResult<PipelineId> {
        let mut state = self.shared.lock()?;
        if state.root_signatures.get(desc.root_signature.index()).is_none() {
            return Err(RhiError::InvalidHandle(format!("{:?}", desc.root_signature)));
        }
        let id = PipelineId(state.pipelines.len() as u32);
        state.pipelines.push(PipelineRecord {
            bind_point: BindPoint::Compute,
            root_signature: desc.root_signature,
        });
        Ok(id)
    }

    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapId> {
        let mut state = self.shared.lock()?;
        let id = DescriptorHeapId(state.heaps.len() as u32);
        state.heaps.push(HeapRecord { capacity, used: 0 });
        Ok(id)
    }

    fn create_descriptor_table(
        &self,
        heap: DescriptorHeapId,
        root_signature: RootSignatureId,
        slot: u32,
        view: &ResourceView,
    ) -> RhiResult<DescriptorTableId> {
        let mut state = self.shared.lock()?;
        let parameter = state
            .root_signatures
            .get(root_signature.index())
            .and_then(|rs| rs.parameters.get(slot as usize))
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{root_signature:?} has no slot {slot}"))
            })?;
        if parameter.descriptor_kind() != view.kind() {
            return Err(RhiError::InvalidState(format!(
                "slot {slot} expects {:?}, got {:?}",
                parameter.descriptor_kind(),
                view.kind()
            )));
        }
        let buffer_size = state.buffer(view.buffer())?.desc.size;
        if view.size() > buffer_size {
            return Err(RhiError::InvalidState(format!(
                "view of {} bytes exceeds {:?} ({buffer_size} bytes)",
                view.size(),
                view.buffer()
            )));
        }

        let record = state
            .heaps
            .get_mut(heap.index())
            .ok_or_else(|| RhiError::InvalidHandle(format!("{heap:?}")))?;
        if record.used >= record.capacity {
            return Err(RhiError::InvalidState(format!("{heap:?} is full")));
        }
        record.used += 1;

        let id = DescriptorTableId(state.tables.len() as u32);
        state.tables.push(TableRecord { view: *view });
        Ok(id)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.shared.wait_idle()
    }
}

/// Headless encoder: keeps the last closed command list.
pub struct HeadlessEncoder {
    queue: QueueKind,
    recorded: Arc<Vec<Command>>,
}

impl HeadlessEncoder {
    pub fn queue(&self) -> QueueKind {
        self.queue
    }
}

impl CommandEncoder for HeadlessEncoder {
    fn reset(&mut self) -> RhiResult<()> {
        self.recorded = Arc::new(Vec::new());
        Ok(())
    }

    fn encode(&mut self, commands: &[Command]) -> RhiResult<()> {
        self.recorded = Arc::new(commands.to_vec());
        Ok(())
    }
}

/// Headless command queue.
pub struct HeadlessQueue {
    pub(crate) kind: QueueKind,
    pub(crate) shared: Arc<Shared>,
}

impl CommandQueue for HeadlessQueue {
    type Encoder = HeadlessEncoder;
    type Signal = HeadlessFence;

    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute(&mut self, encoder: &HeadlessEncoder) -> RhiResult<()> {
        if encoder.queue != self.kind {
            return Err(RhiError::InvalidState(format!(
                "{} recording submitted to the {} queue",
                encoder.queue, self.kind
            )));
        }
        {
            let mut state = self.shared.lock()?;
            state.check_submission(self.kind, &encoder.recorded)?;
            state.push_job(self.kind, Job::Execute(Arc::clone(&encoder.recorded)));
        }
        self.shared.cond.notify_all();
        Ok(())
    }

    fn signal(&mut self, _fence: &HeadlessFence, value: u64) -> RhiResult<()> {
        self.shared.lock()?.enqueue_signal(self.kind, value)?;
        self.shared.cond.notify_all();
        Ok(())
    }
}
