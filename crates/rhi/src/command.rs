//! Backend-neutral command recording.
//!
//! A [`CommandRecorder`] owns one backend encoder (the allocator and command
//! buffer pair of a queue) and moves through a small state machine:
//!
//! ```text
//!   Closed --reset()--> Recording --close()--> Closed --execute--> (GPU)
//! ```
//!
//! Recording appends [`Command`]s to a list without any GPU effect. `close`
//! validates the barrier bookkeeping and hands the list to the encoder.
//! `reset` is refused with [`RhiError::ResourceBusy`] while the previous
//! submission of the same recorder is still pending on the fence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::backend::{Backend, CommandEncoder};
use crate::barrier::{Barrier, StateChange, StateTracker};
use crate::error::{RhiError, RhiResult};
use crate::sync::FenceSignal;
use crate::types::{
    BindPoint, BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, IndexFormat,
    PipelineId, QueueKind, RootSignatureId, ScissorRect, Viewport,
};

/// A single recorded GPU operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ResourceBarrier(Vec<Barrier>),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRootSignature {
        bind_point: BindPoint,
        root_signature: RootSignatureId,
    },
    SetPipeline(PipelineId),
    SetDescriptorHeap(DescriptorHeapId),
    SetDescriptorTable {
        bind_point: BindPoint,
        slot: u32,
        table: DescriptorTableId,
    },
    SetRootConstantBuffer {
        bind_point: BindPoint,
        slot: u32,
        buffer: BufferId,
    },
    SetRenderTarget {
        back_buffer: u32,
        depth: Option<DepthBufferId>,
    },
    ClearRenderTarget {
        back_buffer: u32,
        color: [f32; 4],
    },
    ClearDepth {
        depth: DepthBufferId,
        value: f32,
    },
    SetVertexBuffer {
        buffer: BufferId,
        stride: u32,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: IndexFormat,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
}

impl Command {
    /// True for commands that only make sense on a graphics queue.
    pub fn is_graphics_only(&self) -> bool {
        matches!(
            self,
            Command::SetViewport(_)
                | Command::SetScissor(_)
                | Command::SetRenderTarget { .. }
                | Command::ClearRenderTarget { .. }
                | Command::ClearDepth { .. }
                | Command::SetVertexBuffer { .. }
                | Command::SetIndexBuffer { .. }
                | Command::DrawIndexed { .. }
                | Command::SetRootSignature {
                    bind_point: BindPoint::Graphics,
                    ..
                }
                | Command::SetDescriptorTable {
                    bind_point: BindPoint::Graphics,
                    ..
                }
                | Command::SetRootConstantBuffer {
                    bind_point: BindPoint::Graphics,
                    ..
                }
        )
    }
}

/// Recorder lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Recording,
    Closed,
}

/// Fence value after which a recorder's last submission is retired.
///
/// `0` means nothing is outstanding. [`RetireMarker::UNSIGNALED`] means the
/// content was submitted but no signal has been queued behind it yet.
#[derive(Clone, Debug, Default)]
pub struct RetireMarker(Arc<AtomicU64>);

impl RetireMarker {
    pub const IDLE: u64 = 0;
    pub const UNSIGNALED: u64 = u64::MAX;

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn mark_submitted(&self) {
        self.0.store(Self::UNSIGNALED, Ordering::Release);
    }

    /// Stamp with a fence value, unless a later stamp already exists.
    pub(crate) fn stamp(&self, value: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == Self::UNSIGNALED).then_some(value)
            });
    }
}

/// Reusable per-queue command recorder.
pub struct CommandRecorder<B: Backend> {
    queue: QueueKind,
    encoder: B::Encoder,
    signal: B::Signal,
    state: RecorderState,
    encoded: bool,
    commands: Vec<Command>,
    tracker: StateTracker,
    retire: RetireMarker,
}

impl<B: Backend> CommandRecorder<B> {
    /// Wrap an encoder. Recorders start Closed, so the first frame can reset
    /// them like any other.
    pub fn new(queue: QueueKind, encoder: B::Encoder, signal: B::Signal) -> Self {
        Self {
            queue,
            encoder,
            signal,
            state: RecorderState::Closed,
            encoded: false,
            commands: Vec::new(),
            tracker: StateTracker::new(),
            retire: RetireMarker::default(),
        }
    }

    /// Queue this recorder submits to.
    #[inline]
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Commands of the current or last recording.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// The backend encoder, for queue submission.
    pub fn encoder(&self) -> &B::Encoder {
        &self.encoder
    }

    pub(crate) fn retire_marker(&self) -> &RetireMarker {
        &self.retire
    }

    pub(crate) fn is_submittable(&self) -> bool {
        self.state == RecorderState::Closed && self.encoded
    }

    /// Start a new recording.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidState`] if already recording
    /// - [`RhiError::ResourceBusy`] if the previous submission has not been
    ///   observed complete on the fence
    pub fn reset(&mut self, pipeline: Option<PipelineId>) -> RhiResult<()> {
        if self.state == RecorderState::Recording {
            return Err(RhiError::InvalidState(format!(
                "{} recorder reset while recording",
                self.queue
            )));
        }

        let pending = self.retire.value();
        if pending != RetireMarker::IDLE {
            let completed = self.signal.completed_value();
            if completed < pending {
                return Err(RhiError::ResourceBusy {
                    queue: self.queue,
                    pending,
                    completed,
                });
            }
        }

        self.encoder.reset()?;
        self.commands.clear();
        self.tracker.clear();
        self.encoded = false;
        self.state = RecorderState::Recording;
        if let Some(pipeline) = pipeline {
            self.commands.push(Command::SetPipeline(pipeline));
        }
        trace!(queue = %self.queue, "recorder reset");
        Ok(())
    }

    fn push(&mut self, command: Command) -> RhiResult<()> {
        if self.state != RecorderState::Recording {
            return Err(RhiError::InvalidState(format!(
                "{:?} recorded on a closed {} recorder",
                command, self.queue
            )));
        }
        if self.queue == QueueKind::Compute && command.is_graphics_only() {
            return Err(RhiError::InvalidState(format!(
                "{command:?} is not valid on the compute queue"
            )));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Record a batch of transitions.
    pub fn resource_barrier(&mut self, barriers: &[Barrier]) -> RhiResult<()> {
        self.ensure_recording("resource_barrier")?;
        self.tracker.apply(barriers)?;
        self.push(Command::ResourceBarrier(barriers.to_vec()))
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> RhiResult<()> {
        self.push(Command::SetViewport(viewport))
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) -> RhiResult<()> {
        self.push(Command::SetScissor(scissor))
    }

    pub fn set_root_signature(
        &mut self,
        bind_point: BindPoint,
        root_signature: RootSignatureId,
    ) -> RhiResult<()> {
        self.push(Command::SetRootSignature {
            bind_point,
            root_signature,
        })
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) -> RhiResult<()> {
        self.push(Command::SetPipeline(pipeline))
    }

    pub fn set_descriptor_heap(&mut self, heap: DescriptorHeapId) -> RhiResult<()> {
        self.push(Command::SetDescriptorHeap(heap))
    }

    pub fn set_descriptor_table(
        &mut self,
        bind_point: BindPoint,
        slot: u32,
        table: DescriptorTableId,
    ) -> RhiResult<()> {
        self.push(Command::SetDescriptorTable {
            bind_point,
            slot,
            table,
        })
    }

    /// Bind a constant buffer directly to a root slot.
    pub fn set_root_constant_buffer(
        &mut self,
        bind_point: BindPoint,
        slot: u32,
        buffer: BufferId,
    ) -> RhiResult<()> {
        self.push(Command::SetRootConstantBuffer {
            bind_point,
            slot,
            buffer,
        })
    }

    pub fn set_render_target(
        &mut self,
        back_buffer: u32,
        depth: Option<DepthBufferId>,
    ) -> RhiResult<()> {
        self.push(Command::SetRenderTarget { back_buffer, depth })
    }

    pub fn clear_render_target(&mut self, back_buffer: u32, color: [f32; 4]) -> RhiResult<()> {
        self.push(Command::ClearRenderTarget { back_buffer, color })
    }

    pub fn clear_depth(&mut self, depth: DepthBufferId, value: f32) -> RhiResult<()> {
        self.push(Command::ClearDepth { depth, value })
    }

    pub fn set_vertex_buffer(&mut self, buffer: BufferId, stride: u32) -> RhiResult<()> {
        self.push(Command::SetVertexBuffer { buffer, stride })
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId, format: IndexFormat) -> RhiResult<()> {
        self.push(Command::SetIndexBuffer { buffer, format })
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> RhiResult<()> {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        })
    }

    pub fn dispatch(&mut self, groups: [u32; 3]) -> RhiResult<()> {
        let [x, y, z] = groups;
        self.push(Command::Dispatch { x, y, z })
    }

    pub fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) -> RhiResult<()> {
        self.push(Command::CopyBuffer { src, dst, size })
    }

    /// Finish recording. Every resource must be back in the state the
    /// recording found it in.
    ///
    /// The recorder is Closed afterwards even on error; an unbalanced
    /// recording is discarded and cannot be executed.
    pub fn close(&mut self) -> RhiResult<()> {
        self.ensure_recording("close")?;
        self.state = RecorderState::Closed;

        let changes = self.tracker.net_changes();
        if !changes.is_empty() {
            return Err(RhiError::UnbalancedBarriers(changes.len()));
        }
        self.encode()
    }

    /// Finish a recording that intentionally leaves resources in new states,
    /// such as an initial upload. Returns the net transitions.
    pub fn close_with_transitions(&mut self) -> RhiResult<Vec<StateChange>> {
        self.ensure_recording("close")?;
        self.state = RecorderState::Closed;
        self.encode()?;
        Ok(self.tracker.net_changes())
    }

    fn ensure_recording(&self, op: &str) -> RhiResult<()> {
        if self.state != RecorderState::Recording {
            return Err(RhiError::InvalidState(format!(
                "{op} on a closed {} recorder",
                self.queue
            )));
        }
        Ok(())
    }

    fn encode(&mut self) -> RhiResult<()> {
        self.encoder.encode(&self.commands)?;
        self.encoded = true;
        trace!(queue = %self.queue, commands = self.commands.len(), "recorder closed");
        Ok(())
    }
}

/// Thread-group counts covering `extent` with groups of `group` threads.
///
/// Each extent must be an exact multiple of the group size; anything else is
/// rejected rather than rounded.
pub fn dispatch_grid(extent: [u32; 3], group: [u32; 3]) -> RhiResult<[u32; 3]> {
    let mut grid = [0; 3];
    for axis in 0..3 {
        if group[axis] == 0 {
            return Err(RhiError::ConfigError(format!(
                "thread group size is zero on axis {axis}"
            )));
        }
        if extent[axis] == 0 || !extent[axis].is_multiple_of(group[axis]) {
            return Err(RhiError::ConfigError(format!(
                "extent {} on axis {axis} is not a multiple of the group size {}",
                extent[axis], group[axis]
            )));
        }
        grid[axis] = extent[axis] / group[axis];
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_grid_for_256_cube() {
        assert_eq!(dispatch_grid([256; 3], [8; 3]).unwrap(), [32, 32, 32]);
    }

    #[test]
    fn test_dispatch_grid_rejects_remainders() {
        let err = dispatch_grid([256, 250, 256], [8; 3]).unwrap_err();
        assert!(matches!(err, RhiError::ConfigError(_)));
        assert!(dispatch_grid([0, 8, 8], [8; 3]).is_err());
        assert!(dispatch_grid([8, 8, 8], [8, 0, 8]).is_err());
    }

    #[test]
    fn test_graphics_only_classification() {
        assert!(
            Command::DrawIndexed {
                index_count: 36,
                instance_count: 1,
                first_index: 0,
                base_vertex: 0,
                first_instance: 0,
            }
            .is_graphics_only()
        );
        assert!(!Command::Dispatch { x: 1, y: 1, z: 1 }.is_graphics_only());
        assert!(!Command::ResourceBarrier(Vec::new()).is_graphics_only());
    }

    #[test]
    fn test_retire_marker_stamp_only_replaces_unsignaled() {
        let marker = RetireMarker::default();
        assert_eq!(marker.value(), RetireMarker::IDLE);

        marker.stamp(4);
        assert_eq!(marker.value(), RetireMarker::IDLE);

        marker.mark_submitted();
        marker.stamp(5);
        marker.stamp(6);
        assert_eq!(marker.value(), 5);
    }
}
