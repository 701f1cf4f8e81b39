//! Queue submission.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::backend::CommandQueue;
use crate::error::RhiResult;
use crate::types::QueueKind;
use crate::vulkan::command::VulkanEncoder;
use crate::vulkan::device::Device;
use crate::vulkan::swapchain::{PresentState, SharedPresent};
use crate::vulkan::sync::TimelineFence;

/// A graphics or compute queue.
///
/// The graphics queue also carries the swap chain's pending acquire: its
/// first submission after an acquire waits on the image becoming available.
pub struct VulkanQueue {
    kind: QueueKind,
    device: Arc<Device>,
    queue: vk::Queue,
    present: Option<SharedPresent>,
}

impl VulkanQueue {
    pub(crate) fn new(device: Arc<Device>, kind: QueueKind, present: Option<SharedPresent>) -> Self {
        let queue = device.queue(kind);
        Self {
            kind,
            device,
            queue,
            present,
        }
    }

    fn submit(
        &self,
        waits: &[vk::SemaphoreSubmitInfo<'_>],
        command_buffers: &[vk::CommandBufferSubmitInfo<'_>],
        signals: &[vk::SemaphoreSubmitInfo<'_>],
    ) -> RhiResult<()> {
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(waits)
            .command_buffer_infos(command_buffers)
            .signal_semaphore_infos(signals);
        unsafe {
            self.device
                .handle()
                .queue_submit2(self.queue, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }
}

impl CommandQueue for VulkanQueue {
    type Encoder = VulkanEncoder;
    type Signal = TimelineFence;

    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn execute(&mut self, encoder: &VulkanEncoder) -> RhiResult<()> {
        let acquire = match &self.present {
            Some(present) => PresentState::lock(present)?.take_acquire(),
            None => None,
        };
        let waits: Vec<vk::SemaphoreSubmitInfo<'_>> = acquire
            .into_iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let command_buffers =
            [vk::CommandBufferSubmitInfo::default().command_buffer(encoder.command_buffer())];

        self.submit(&waits, &command_buffers, &[])?;
        trace!(queue = %self.kind, waits_on_acquire = !waits.is_empty(), "Submitted command buffer");
        Ok(())
    }

    fn signal(&mut self, fence: &TimelineFence, value: u64) -> RhiResult<()> {
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.handle())
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        self.submit(&[], &[], &signals)?;
        trace!(queue = %self.kind, value, "Queued fence signal");
        Ok(())
    }
}
