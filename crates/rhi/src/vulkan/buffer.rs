//! GPU buffer management.
//!
//! Buffers are created from a backend-neutral [`BufferDesc`]. Memory comes
//! from gpu-allocator; upload buffers stay persistently mapped.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::desc::{BufferDesc, BufferUsage, MemoryKind};
use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;
use crate::vulkan::memory::BoundMemory;

/// Converts a buffer usage to Vulkan buffer usage flags.
fn to_vk_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Index => {
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Uniform => {
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Storage => {
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
        }
        BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

fn memory_location(memory: MemoryKind) -> MemoryLocation {
    match memory {
        MemoryKind::Upload => MemoryLocation::CpuToGpu,
        MemoryKind::DeviceLocal => MemoryLocation::GpuOnly,
    }
}

/// A buffer and the memory bound to it.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: BufferUsage,
    // Dropped after the buffer is destroyed.
    memory: BoundMemory,
}

impl Buffer {
    /// Buffers are shared concurrently between the graphics and compute
    /// families when those differ.
    ///
    /// # Errors
    ///
    /// Rejects an empty buffer and propagates creation and allocation failures.
    pub fn new(device: Arc<Device>, desc: &BufferDesc) -> RhiResult<Self> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!("Buffer '{}' is empty", desc.label)));
        }

        let families = device.sharing_families();
        let mut buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(to_vk_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if families.len() > 1 {
            buffer_info = buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families);
        }
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let memory = BoundMemory::buffer(&device, buffer, &desc.label, memory_location(desc.memory))?;

        debug!(
            "Created {} buffer '{}': {} bytes in {:?} memory",
            desc.usage.name(),
            desc.label,
            desc.size,
            desc.memory
        );
        Ok(Self {
            device,
            buffer,
            size: desc.size,
            usage: desc.usage,
            memory,
        })
    }

    /// Copy `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Fails for device-local buffers and for writes past the end.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidHandle(format!(
                "Write of {} bytes at {} overruns {} byte buffer",
                data.len(),
                offset,
                self.size
            )));
        }
        let mapped = self.memory.mapped_ptr().ok_or_else(|| {
            RhiError::InvalidHandle(format!("{} buffer is not host visible", self.usage.name()))
        })?;

        // SAFETY: the range was checked against the buffer size and the
        // mapping covers the whole allocation.
        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
    }
}
