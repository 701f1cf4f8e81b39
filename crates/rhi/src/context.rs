//! Device/queue context.
//!
//! [`DeviceContext`] exclusively owns the device, the graphics queue, the
//! optional compute queue, the single fence both queues signal, and the swap
//! chain. All of it is used from the render thread only.

use tracing::{debug, info, warn};

use crate::backend::{Backend, CommandQueue, GpuDevice, SwapChain};
use crate::command::{CommandRecorder, RetireMarker};
use crate::error::{RhiError, RhiResult};
use crate::sync::{Fence, Ticket};
use crate::types::{Extent2D, QueueKind};

/// Device, queues, fence and swap chain of one backend.
pub struct DeviceContext<B: Backend> {
    // Field order is drop order: the swap chain and queues go before the device.
    swap_chain: B::SwapChain,
    graphics: B::Queue,
    compute: Option<B::Queue>,
    fence: Fence<B::Signal>,
    pending: [Vec<RetireMarker>; 2],
    device: B::Device,
}

fn slot(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Graphics => 0,
        QueueKind::Compute => 1,
    }
}

impl<B: Backend> DeviceContext<B> {
    /// Assemble a context from backend parts. The fence counter starts at zero.
    pub fn from_parts(
        device: B::Device,
        graphics: B::Queue,
        compute: Option<B::Queue>,
        fence: B::Signal,
        swap_chain: B::SwapChain,
    ) -> Self {
        info!(
            adapter = %device.adapter_name(),
            compute_queue = compute.is_some(),
            buffers = swap_chain.buffer_count(),
            "Device context ready"
        );
        Self {
            swap_chain,
            graphics,
            compute,
            fence: Fence::new(fence),
            pending: [Vec::new(), Vec::new()],
            device,
        }
    }

    #[inline]
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    #[inline]
    pub fn swap_chain(&self) -> &B::SwapChain {
        &self.swap_chain
    }

    #[inline]
    pub fn fence(&self) -> &Fence<B::Signal> {
        &self.fence
    }

    /// True if the context was created with a queue of this kind.
    pub fn has_queue(&self, queue: QueueKind) -> bool {
        match queue {
            QueueKind::Graphics => true,
            QueueKind::Compute => self.compute.is_some(),
        }
    }

    fn queue_mut(&mut self, queue: QueueKind) -> RhiResult<&mut B::Queue> {
        match queue {
            QueueKind::Graphics => Ok(&mut self.graphics),
            QueueKind::Compute => self
                .compute
                .as_mut()
                .ok_or_else(|| RhiError::InvalidState("context has no compute queue".into())),
        }
    }

    /// Create a recorder owning a fresh encoder for `queue`.
    pub fn create_recorder(&self, queue: QueueKind) -> RhiResult<CommandRecorder<B>> {
        if !self.has_queue(queue) {
            return Err(RhiError::InvalidState(format!(
                "cannot create a {queue} recorder without a {queue} queue"
            )));
        }
        let encoder = self.device.create_encoder(queue)?;
        debug!(%queue, "Created command recorder");
        Ok(CommandRecorder::new(queue, encoder, self.fence.signal().clone()))
    }

    /// Submit a closed recording to its queue.
    ///
    /// The recorder stays busy until a later [`DeviceContext::signal`] on the
    /// same queue completes.
    pub fn execute(&mut self, recorder: &mut CommandRecorder<B>) -> RhiResult<()> {
        if !recorder.is_submittable() {
            return Err(RhiError::InvalidState(format!(
                "{} recorder is not closed with a valid recording",
                recorder.queue()
            )));
        }
        let queue = recorder.queue();
        self.queue_mut(queue)?.execute(recorder.encoder())?;

        let marker = recorder.retire_marker().clone();
        marker.mark_submitted();
        self.pending[slot(queue)].push(marker);
        Ok(())
    }

    /// Ask `queue` to advance the fence to the next ticket once its prior work
    /// is done.
    pub fn signal(&mut self, queue: QueueKind) -> RhiResult<Ticket> {
        let signal = self.fence.signal().clone();
        // A missing queue must not consume a ticket
        let target = match queue {
            QueueKind::Graphics => &mut self.graphics,
            QueueKind::Compute => self
                .compute
                .as_mut()
                .ok_or_else(|| RhiError::InvalidState("context has no compute queue".into()))?,
        };
        let ticket = self.fence.next_ticket();
        target.signal(&signal, ticket.value())?;

        for marker in self.pending[slot(queue)].drain(..) {
            marker.stamp(ticket.value());
        }
        Ok(ticket)
    }

    /// Block until the fence reaches `ticket`.
    pub fn wait(&self, ticket: Ticket) -> RhiResult<()> {
        self.fence.wait(ticket)
    }

    /// Signal `queue` and wait for it.
    pub fn flush(&mut self, queue: QueueKind) -> RhiResult<Ticket> {
        let ticket = self.signal(queue)?;
        self.wait(ticket)?;
        Ok(ticket)
    }

    /// Present the current back buffer.
    pub fn present(&mut self, sync_interval: u32) -> RhiResult<()> {
        self.swap_chain.present(sync_interval)
    }

    #[inline]
    pub fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain.current_back_buffer_index()
    }

    /// Resize the swap chain, keeping its image count. Callers drain first.
    pub fn resize_swap_chain(&mut self, extent: Extent2D) -> RhiResult<()> {
        let count = self.swap_chain.buffer_count();
        self.swap_chain.resize(count, extent)
    }
}

impl<B: Backend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle during context teardown failed: {}", e);
        }
        debug!("Device context destroyed");
    }
}
