//! The simulated GPU timeline shared by every headless object.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{trace, warn};

use crate::barrier::{Barrier, ResourceHandle, ResourceState};
use crate::command::Command;
use crate::desc::{BufferDesc, DescriptorKind, ResourceView, RootSignatureDesc};
use crate::error::{RhiError, RhiResult};
use crate::sync::FenceSignal;
use crate::types::{BindPoint, BufferId, DescriptorTableId, Extent2D, QueueKind, RootSignatureId};

use super::HeadlessConfig;

/// Something the simulated GPU did, in timeline order.
#[derive(Clone, Debug, PartialEq)]
pub enum GpuEvent {
    /// A command list started executing.
    Executed { queue: QueueKind, commands: usize },
    /// The fence was written.
    Signaled { queue: QueueKind, value: u64 },
    /// A back buffer was presented.
    Presented { back_buffer: u32 },
    /// An indexed draw ran.
    Draw {
        back_buffer: Option<u32>,
        index_count: u32,
    },
    /// A compute dispatch ran.
    Dispatch { groups: [u32; 3] },
    /// A buffer copy ran.
    Copy { src: BufferId, dst: BufferId, size: u64 },
    /// The swap chain was resized.
    Resized { extent: Extent2D, buffer_count: u32 },
    /// A barrier or use disagreed with the resource's actual state.
    Violation(String),
    /// A graphics read raced a compute write.
    Hazard(String),
}

pub(crate) enum Job {
    Execute(Arc<Vec<Command>>),
    Signal(u64),
    Present(u32),
}

#[derive(Clone, Copy, Debug)]
enum WriteMark {
    Unsignaled(QueueKind),
    Signaled { queue: QueueKind, value: u64 },
}

pub(crate) struct BufferRecord {
    pub desc: BufferDesc,
    pub data: Vec<u8>,
    pub released: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct PipelineRecord {
    pub bind_point: BindPoint,
    pub root_signature: RootSignatureId,
}

pub(crate) struct HeapRecord {
    pub capacity: u32,
    pub used: u32,
}

pub(crate) struct TableRecord {
    pub view: ResourceView,
}

fn queue_slot(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Graphics => 0,
        QueueKind::Compute => 1,
    }
}

/// Everything behind the timeline lock.
#[derive(Default)]
pub(crate) struct State {
    pub completed: u64,
    pub observed: u64,
    pub shutdown: bool,
    next_seq: u64,
    last_signal: u64,
    queues: [VecDeque<(u64, QueueKind, Job)>; 2],
    pub journal: Vec<GpuEvent>,
    pub states: HashMap<ResourceHandle, ResourceState>,
    pub buffers: Vec<BufferRecord>,
    pub depth_buffers: Vec<Option<Extent2D>>,
    pub root_signatures: Vec<RootSignatureDesc>,
    pub pipelines: Vec<PipelineRecord>,
    pub heaps: Vec<HeapRecord>,
    pub tables: Vec<TableRecord>,
    writes: HashMap<BufferId, WriteMark>,
    unsignaled_writes: [Vec<BufferId>; 2],
}

impl State {
    /// True while any queue holds unprocessed work.
    pub fn has_pending_jobs(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    fn has_pending_signal(&self, value: u64) -> bool {
        self.queues
            .iter()
            .flatten()
            .any(|(_, _, job)| matches!(job, Job::Signal(v) if *v >= value))
    }

    pub fn push_job(&mut self, queue: QueueKind, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues[queue_slot(queue)].push_back((seq, queue, job));
    }

    pub fn buffer(&self, id: BufferId) -> RhiResult<&BufferRecord> {
        self.buffers
            .get(id.index())
            .filter(|record| !record.released)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{id:?}")))
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> RhiResult<&mut BufferRecord> {
        self.buffers
            .get_mut(id.index())
            .filter(|record| !record.released)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{id:?}")))
    }

    fn table(&self, id: DescriptorTableId) -> RhiResult<&TableRecord> {
        self.tables
            .get(id.index())
            .ok_or_else(|| RhiError::InvalidHandle(format!("{id:?}")))
    }

    /// Retire the oldest job across both queues.
    pub fn process_next(&mut self) -> bool {
        let slot = match (self.queues[0].front(), self.queues[1].front()) {
            (Some((a, ..)), Some((b, ..))) => usize::from(b < a),
            (Some(_), None) => 0,
            (None, Some(_)) => 1,
            (None, None) => return false,
        };
        let Some((_, queue, job)) = self.queues[slot].pop_front() else {
            return false;
        };
        match job {
            Job::Execute(commands) => self.run_commands(queue, &commands),
            Job::Signal(value) => {
                self.completed = self.completed.max(value);
                self.journal.push(GpuEvent::Signaled { queue, value });
                trace!(%queue, value, "headless fence signaled");
            }
            Job::Present(index) => {
                self.expect_state(ResourceHandle::BackBuffer(index), ResourceState::Present, "present");
                self.journal.push(GpuEvent::Presented { back_buffer: index });
            }
        }
        true
    }

    /// Retire every queued job.
    pub fn process_all(&mut self) {
        while self.process_next() {}
    }

    fn violation(&mut self, message: String) {
        warn!("headless: {}", message);
        self.journal.push(GpuEvent::Violation(message));
    }

    fn expect_state(&mut self, resource: ResourceHandle, expected: ResourceState, use_: &str) {
        match self.states.get(&resource).copied() {
            Some(actual) if actual == expected => {}
            Some(actual) => self.violation(format!(
                "{use_} of {resource:?} in {actual:?}, expected {expected:?}"
            )),
            None => self.violation(format!("{use_} of unknown resource {resource:?}")),
        }
    }

    fn transition(&mut self, barrier: &Barrier) {
        match self.states.get(&barrier.resource).copied() {
            Some(actual) if actual != barrier.before => self.violation(format!(
                "barrier on {:?} assumes {:?} but resource is in {:?}",
                barrier.resource, barrier.before, actual
            )),
            None => {
                self.violation(format!("barrier on unknown resource {:?}", barrier.resource));
                return;
            }
            Some(_) => {}
        }
        self.states.insert(barrier.resource, barrier.after);
    }

    fn run_commands(&mut self, queue: QueueKind, commands: &[Command]) {
        self.journal.push(GpuEvent::Executed {
            queue,
            commands: commands.len(),
        });
        let mut render_target = None;
        for command in commands {
            match *command {
                Command::ResourceBarrier(ref barriers) => {
                    for barrier in barriers {
                        self.transition(barrier);
                    }
                }
                Command::SetRenderTarget { back_buffer, depth } => {
                    render_target = Some(back_buffer);
                    if let Some(depth) = depth {
                        self.expect_state(ResourceHandle::Depth(depth), ResourceState::DepthWrite, "depth target");
                    }
                }
                Command::ClearRenderTarget { back_buffer, .. } => self.expect_state(
                    ResourceHandle::BackBuffer(back_buffer),
                    ResourceState::RenderTarget,
                    "clear",
                ),
                Command::ClearDepth { depth, .. } => {
                    self.expect_state(ResourceHandle::Depth(depth), ResourceState::DepthWrite, "depth clear")
                }
                Command::DrawIndexed { index_count, .. } => {
                    if let Some(index) = render_target {
                        self.expect_state(
                            ResourceHandle::BackBuffer(index),
                            ResourceState::RenderTarget,
                            "draw",
                        );
                    }
                    self.journal.push(GpuEvent::Draw {
                        back_buffer: render_target,
                        index_count,
                    });
                }
                Command::Dispatch { x, y, z } => {
                    self.journal.push(GpuEvent::Dispatch { groups: [x, y, z] });
                }
                Command::CopyBuffer { src, dst, size } => self.copy_buffer(src, dst, size),
                _ => {}
            }
        }
    }

    fn copy_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) {
        let src_state = self.states.get(&ResourceHandle::Buffer(src)).copied();
        if !matches!(
            src_state,
            Some(ResourceState::GenericRead | ResourceState::CopySource)
        ) {
            self.violation(format!("copy from {src:?} in {src_state:?}"));
        }
        self.expect_state(ResourceHandle::Buffer(dst), ResourceState::CopyDest, "copy destination");

        let bytes = match self.buffer(src) {
            Ok(record) if record.data.len() as u64 >= size => record.data[..size as usize].to_vec(),
            _ => {
                self.violation(format!("copy of {size} bytes out of bounds of {src:?}"));
                return;
            }
        };
        match self.buffer_mut(dst) {
            Ok(record) if record.data.len() >= bytes.len() => {
                record.data[..bytes.len()].copy_from_slice(&bytes);
            }
            _ => {
                self.violation(format!("copy of {size} bytes out of bounds of {dst:?}"));
                return;
            }
        }
        self.journal.push(GpuEvent::Copy { src, dst, size });
    }

    /// CPU-side checks when a command list is submitted.
    ///
    /// Compute dispatches mark their unordered-access buffers as written. A
    /// graphics draw that reads such a buffer before the CPU has observed the
    /// fence value that retires the write is a hazard.
    pub fn check_submission(&mut self, queue: QueueKind, commands: &[Command]) -> RhiResult<()> {
        let mut bound: HashMap<(BindPoint, u32), DescriptorTableId> = HashMap::new();
        let mut root_signatures: HashMap<BindPoint, RootSignatureId> = HashMap::new();
        let mut pipeline: Option<PipelineRecord> = None;
        let mut written = Vec::new();

        for command in commands {
            match *command {
                Command::SetPipeline(id) => {
                    let record = self
                        .pipelines
                        .get(id.index())
                        .ok_or_else(|| RhiError::InvalidHandle(format!("{id:?}")))?;
                    let compute_pipeline = record.bind_point == BindPoint::Compute;
                    if compute_pipeline != (queue == QueueKind::Compute) {
                        return Err(RhiError::InvalidState(format!(
                            "{:?} pipeline bound on the {queue} queue",
                            record.bind_point
                        )));
                    }
                    pipeline = Some(*record);
                }
                Command::SetRootSignature {
                    bind_point,
                    root_signature,
                } => {
                    root_signatures.insert(bind_point, root_signature);
                }
                Command::SetDescriptorTable {
                    bind_point,
                    slot,
                    table,
                } => {
                    self.table(table)?;
                    bound.insert((bind_point, slot), table);
                }
                Command::Dispatch { .. } => {
                    Self::check_layout(pipeline, &root_signatures)?;
                    for (&(bind_point, _), &table) in &bound {
                        let view = self.table(table)?.view;
                        if bind_point == BindPoint::Compute
                            && view.kind() == DescriptorKind::UnorderedAccess
                        {
                            written.push(view.buffer());
                        }
                    }
                }
                Command::DrawIndexed { .. } => {
                    Self::check_layout(pipeline, &root_signatures)?;
                    for (&(bind_point, _), &table) in &bound {
                        let view = self.table(table)?.view;
                        if bind_point == BindPoint::Graphics
                            && view.kind() != DescriptorKind::UnorderedAccess
                        {
                            self.check_read(queue, view.buffer())?;
                        }
                    }
                }
                _ => {}
            }
        }

        for buffer in written {
            self.writes.insert(buffer, WriteMark::Unsignaled(queue));
            self.unsignaled_writes[queue_slot(queue)].push(buffer);
        }
        Ok(())
    }

    fn check_layout(
        pipeline: Option<PipelineRecord>,
        root_signatures: &HashMap<BindPoint, RootSignatureId>,
    ) -> RhiResult<()> {
        let pipeline =
            pipeline.ok_or_else(|| RhiError::InvalidState("draw or dispatch without a pipeline".into()))?;
        match root_signatures.get(&pipeline.bind_point) {
            Some(&bound) if bound == pipeline.root_signature => Ok(()),
            other => Err(RhiError::InvalidState(format!(
                "pipeline built for {:?} but root signature {:?} is bound",
                pipeline.root_signature, other
            ))),
        }
    }

    fn check_read(&mut self, reader: QueueKind, buffer: BufferId) -> RhiResult<()> {
        let message = match self.writes.get(&buffer).copied() {
            Some(WriteMark::Unsignaled(writer)) if writer != reader => format!(
                "{reader} queue reads {buffer:?} written by the {writer} queue with no fence signal behind it"
            ),
            Some(WriteMark::Signaled { queue: writer, value })
                if writer != reader && value > self.observed =>
            {
                format!(
                    "{reader} queue reads {buffer:?} before fence value {value} from the {writer} queue was observed (observed {})",
                    self.observed
                )
            }
            _ => return Ok(()),
        };
        self.journal.push(GpuEvent::Hazard(message.clone()));
        Err(RhiError::Hazard(message))
    }

    /// CPU-side bookkeeping for a signal request.
    pub fn enqueue_signal(&mut self, queue: QueueKind, value: u64) -> RhiResult<()> {
        if value <= self.last_signal {
            return Err(RhiError::TicketReused {
                value,
                last: self.last_signal,
            });
        }
        self.last_signal = value;
        for buffer in self.unsignaled_writes[queue_slot(queue)].drain(..) {
            self.writes.insert(buffer, WriteMark::Signaled { queue, value });
        }
        self.push_job(queue, Job::Signal(value));
        Ok(())
    }
}

/// State plus the condition variable signaled whenever a job retires.
pub(crate) struct Shared {
    state: Mutex<State>,
    pub cond: Condvar,
    pub config: HeadlessConfig,
}

impl Shared {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            config,
        }
    }

    pub fn lock(&self) -> RhiResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RhiError::InvalidState("headless timeline lock poisoned".into()))
    }

    fn wait_on<'a>(&self, guard: MutexGuard<'a, State>) -> RhiResult<MutexGuard<'a, State>> {
        self.cond
            .wait(guard)
            .map_err(|_| RhiError::InvalidState("headless timeline lock poisoned".into()))
    }

    /// Block until the completed value reaches `value`.
    pub fn wait_until(&self, value: u64) -> RhiResult<()> {
        let mut state = self.lock()?;
        loop {
            if state.completed >= value {
                state.observed = state.observed.max(state.completed);
                return Ok(());
            }
            if !state.has_pending_signal(value) {
                return Err(RhiError::Deadlock {
                    value,
                    completed: state.completed,
                });
            }
            if self.config.threaded {
                state = self.wait_on(state)?;
            } else {
                state.process_next();
            }
        }
    }

    /// Block until every queue is empty.
    pub fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.lock()?;
        while state.has_pending_jobs() {
            if self.config.threaded {
                state = self.wait_on(state)?;
            } else {
                state.process_all();
            }
        }
        state.observed = state.observed.max(state.completed);
        Ok(())
    }

    /// Body of the simulated GPU thread.
    pub fn run_worker(&self) {
        loop {
            if !self.config.latency.is_zero() {
                std::thread::sleep(self.config.latency);
            }
            let Ok(mut state) = self.lock() else {
                return;
            };
            while !state.has_pending_jobs() && !state.shutdown {
                match self.cond.wait(state) {
                    Ok(guard) => state = guard,
                    Err(_) => return,
                }
            }
            if state.shutdown && !state.has_pending_jobs() {
                return;
            }
            state.process_next();
            drop(state);
            self.cond.notify_all();
        }
    }
}

/// Headless fence completion source.
#[derive(Clone)]
pub struct HeadlessFence {
    pub(crate) shared: Arc<Shared>,
}

impl FenceSignal for HeadlessFence {
    fn completed_value(&self) -> u64 {
        match self.shared.lock() {
            Ok(mut state) => {
                state.observed = state.observed.max(state.completed);
                state.completed
            }
            Err(_) => 0,
        }
    }

    fn wait_for(&self, value: u64) -> RhiResult<()> {
        self.shared.wait_until(value)
    }
}
