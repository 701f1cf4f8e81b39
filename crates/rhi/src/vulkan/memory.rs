//! Allocations from gpu-allocator bound to buffers and images.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::error;

use crate::error::RhiResult;
use crate::vulkan::device::Device;

/// Memory backing one resource, returned to the allocator on drop.
///
/// Owners destroy their Vulkan object before this is dropped.
pub(crate) struct BoundMemory {
    device: Arc<Device>,
    allocation: Option<Allocation>,
    name: String,
}

impl BoundMemory {
    /// Allocate and bind memory for `buffer`. Destroys `buffer` on failure.
    pub fn buffer(
        device: &Arc<Device>,
        buffer: vk::Buffer,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<Self> {
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };
        let bound = Self::allocate(device, requirements, name, location, true).and_then(|memory| {
            let allocation = memory.allocation()?;
            unsafe {
                device
                    .handle()
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?
            };
            Ok(memory)
        });
        if bound.is_err() {
            unsafe { device.handle().destroy_buffer(buffer, None) };
        }
        bound
    }

    /// Allocate and bind GPU-only memory for `image`. Destroys `image` on
    /// failure.
    pub fn image(device: &Arc<Device>, image: vk::Image, name: &str) -> RhiResult<Self> {
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        let bound = Self::allocate(device, requirements, name, MemoryLocation::GpuOnly, false)
            .and_then(|memory| {
                let allocation = memory.allocation()?;
                unsafe {
                    device
                        .handle()
                        .bind_image_memory(image, allocation.memory(), allocation.offset())?
                };
                Ok(memory)
            });
        if bound.is_err() {
            unsafe { device.handle().destroy_image(image, None) };
        }
        bound
    }

    fn allocate(
        device: &Arc<Device>,
        requirements: vk::MemoryRequirements,
        name: &str,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<Self> {
        let allocation = device.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(Self {
            device: Arc::clone(device),
            allocation: Some(allocation),
            name: name.to_string(),
        })
    }

    fn allocation(&self) -> RhiResult<&Allocation> {
        self.allocation.as_ref().ok_or_else(|| {
            crate::error::RhiError::InvalidState("allocation already released".to_string())
        })
    }

    /// CPU pointer for host-visible memory.
    pub fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.allocation.as_ref().and_then(Allocation::mapped_ptr)
    }
}

impl Drop for BoundMemory {
    fn drop(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };
        let name = &self.name;
        match self.device.allocator() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    error!("Failed to free '{}': {:?}", name, e);
                }
            }
            Err(e) => error!("Leaking '{}': {}", name, e),
        }
    }
}
