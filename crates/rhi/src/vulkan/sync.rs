//! Semaphores.
//!
//! The presentation engine only accepts binary semaphores, so acquire and
//! present use those. The CPU/GPU fence is a timeline semaphore: queues
//! signal increasing payloads from their submissions and the host reads or
//! waits on the counter directly.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::error::RhiResult;
use crate::sync::FenceSignal;
use crate::vulkan::device::Device;

/// An owned `VkSemaphore`, binary or timeline.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// An unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Self::create(device, &mut vk::SemaphoreTypeCreateInfo::default())
    }

    /// A timeline semaphore whose payload starts at 0.
    pub fn timeline(device: Arc<Device>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        Self::create(device, &mut type_info)
    }

    fn create(device: Arc<Device>, type_info: &mut vk::SemaphoreTypeCreateInfo<'_>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default().push_next(type_info);
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// The fence both queues signal. Clones share the semaphore.
#[derive(Clone)]
pub struct TimelineFence {
    inner: Arc<Semaphore>,
}

impl TimelineFence {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let inner = Arc::new(Semaphore::timeline(device)?);
        debug!("Created timeline fence");
        Ok(Self { inner })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.inner.semaphore
    }
}

impl FenceSignal for TimelineFence {
    fn completed_value(&self) -> u64 {
        let value = unsafe {
            self.inner
                .device
                .handle()
                .get_semaphore_counter_value(self.inner.semaphore)
        };
        // A lost device reads as no progress; the next wait reports the error.
        value.unwrap_or(0)
    }

    fn wait_for(&self, value: u64) -> RhiResult<()> {
        trace!(value, "Waiting on timeline fence");
        let semaphores = [self.inner.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.inner
                .device
                .handle()
                .wait_semaphores(&wait_info, u64::MAX)?
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TimelineFence>();
        assert_send_sync::<Semaphore>();
    }
}
