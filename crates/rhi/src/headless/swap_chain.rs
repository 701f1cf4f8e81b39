//! Headless swap chain.

use std::sync::Arc;

use crate::backend::SwapChain;
use crate::barrier::{ResourceHandle, ResourceState};
use crate::error::{RhiError, RhiResult};
use crate::types::{Extent2D, Format, QueueKind};

use super::timeline::{GpuEvent, Job, Shared};

/// A ring of virtual back buffers.
///
/// Presentation advances the current index either round-robin or through a
/// configured order, so callers cannot assume it increments.
pub struct HeadlessSwapChain {
    shared: Arc<Shared>,
    buffer_count: u32,
    extent: Extent2D,
    format: Format,
    current: u32,
    presents: usize,
}

impl HeadlessSwapChain {
    pub(crate) fn new(
        shared: Arc<Shared>,
        buffer_count: u32,
        extent: Extent2D,
        format: Format,
    ) -> RhiResult<Self> {
        if buffer_count < 2 {
            return Err(RhiError::SwapchainError(format!(
                "swap chain needs at least 2 buffers, got {buffer_count}"
            )));
        }
        let mut swap_chain = Self {
            shared,
            buffer_count,
            extent,
            format,
            current: 0,
            presents: 0,
        };
        swap_chain.reset_images()?;
        Ok(swap_chain)
    }

    fn reset_images(&mut self) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        state
            .states
            .retain(|handle, _| !matches!(handle, ResourceHandle::BackBuffer(_)));
        for index in 0..self.buffer_count {
            state
                .states
                .insert(ResourceHandle::BackBuffer(index), ResourceState::Present);
        }
        self.current = self.index_after_presents(0);
        Ok(())
    }

    /// Index that becomes current after `presents` presentations.
    fn index_after_presents(&self, presents: usize) -> u32 {
        match &self.shared.config.present_order {
            Some(order) if !order.is_empty() => order[presents % order.len()] % self.buffer_count,
            _ => (presents % self.buffer_count as usize) as u32,
        }
    }
}

impl SwapChain for HeadlessSwapChain {
    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn format(&self) -> Format {
        self.format
    }

    fn present(&mut self, _sync_interval: u32) -> RhiResult<()> {
        self.shared
            .lock()?
            .push_job(QueueKind::Graphics, Job::Present(self.current));
        self.shared.cond.notify_all();

        self.presents += 1;
        self.current = self.index_after_presents(self.presents);
        Ok(())
    }

    fn resize(&mut self, buffer_count: u32, extent: Extent2D) -> RhiResult<()> {
        if extent.is_empty() {
            return Err(RhiError::SwapchainError("resize to an empty extent".into()));
        }
        if self.shared.lock()?.has_pending_jobs() {
            return Err(RhiError::SwapchainError(
                "resize while GPU work referencing the back buffers is in flight".into(),
            ));
        }
        let extent = self.shared.config.surface_extent.unwrap_or(extent);
        self.buffer_count = buffer_count;
        self.extent = extent;
        self.presents = 0;
        self.reset_images()?;
        self.shared.lock()?.journal.push(GpuEvent::Resized {
            extent,
            buffer_count,
        });
        Ok(())
    }
}
