//! Logical device, queues and the memory allocator.
//!
//! [`Device`] is the shared `VkDevice` every Vulkan object holds an `Arc` to.
//! [`VulkanDevice`] layers the backend-neutral [`GpuDevice`] factory on top.

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::backend::GpuDevice;
use crate::desc::{
    BufferDesc, ComputePipelineDesc, GraphicsPipelineDesc, ResourceView, RootSignatureDesc,
};
use crate::error::{RhiError, RhiResult};
use crate::types::{
    BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, Extent2D, Format, PipelineId,
    QueueKind, RootSignatureId,
};
use crate::vulkan::buffer::Buffer;
use crate::vulkan::command::VulkanEncoder;
use crate::vulkan::depth::DepthImage;
use crate::vulkan::descriptor::DescriptorPool;
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::vulkan::pipeline::{Pipeline, RootLayout};
use crate::vulkan::registry::{Registry, SharedRegistry};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// The logical device. Shared through `Arc`; the allocator sits behind a
/// `Mutex` so any thread may create resources.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    adapter_name: String,
    /// Largest range a uniform buffer descriptor may cover.
    max_uniform_buffer_range: u32,
    /// GPU memory allocator. Dropped explicitly before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// May be a second queue of the graphics family.
    compute_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    /// Keeps the instance alive until the device is destroyed.
    _instance: Arc<Instance>,
}

impl Device {
    /// Create the device with timeline semaphores, dynamic rendering and
    /// synchronization2 enabled, then its allocator.
    pub fn new(
        instance: Arc<Instance>,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let compute_family = queue_families.compute_family.unwrap_or(graphics_family);
        let compute_index = queue_families.compute_queue_index();

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32, 1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                // A second graphics-family queue carries compute work when
                // there is no dedicated compute family.
                let count = if family == compute_family { compute_index + 1 } else { 1 };
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities[..count as usize])
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default();

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!("Created logical device on '{}'", physical_device_info.device_name());

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let compute_queue = unsafe { device.get_device_queue(compute_family, compute_index) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}, compute family {} (index {})",
            graphics_family, present_family, compute_family, compute_index
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;


        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            adapter_name: physical_device_info.device_name().to_string(),
            max_uniform_buffer_range: physical_device_info
                .properties
                .limits
                .max_uniform_buffer_range,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            compute_queue,
            queue_families,
            _instance: instance,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    #[inline]
    pub fn max_uniform_buffer_range(&self) -> u32 {
        self.max_uniform_buffer_range
    }

    /// Queue families that touch shared resources. More than one entry
    /// means resources need concurrent sharing.
    pub fn sharing_families(&self) -> Vec<u32> {
        let mut families = vec![self.queue_family(QueueKind::Graphics)];
        let compute = self.queue_family(QueueKind::Compute);
        if !families.contains(&compute) {
            families.push(compute);
        }
        families
    }

    /// Queue handle for a workload class.
    #[inline]
    pub fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
        }
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Queue family a workload class submits to.
    pub fn queue_family(&self, kind: QueueKind) -> u32 {
        let graphics = self.queue_families.graphics_family.unwrap_or(0);
        match kind {
            QueueKind::Graphics => graphics,
            QueueKind::Compute => self.queue_families.compute_family.unwrap_or(graphics),
        }
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidState("allocator mutex poisoned".to_string()))
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::PhysicalDevice and vk::Queue are Copy types (handles)
// - Allocator is protected by Mutex
// - Queue submission is serialized by the single render thread
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Backend device: the resource factory handed to samples.
pub struct VulkanDevice {
    device: Arc<Device>,
    registry: SharedRegistry,
}

impl VulkanDevice {
    pub(crate) fn new(device: Arc<Device>, registry: SharedRegistry) -> Self {
        Self { device, registry }
    }

    /// The underlying logical device.
    #[inline]
    pub fn raw(&self) -> &Arc<Device> {
        &self.device
    }

    fn registry(&self) -> RhiResult<MutexGuard<'_, Registry>> {
        Registry::lock(&self.registry)
    }
}

impl GpuDevice for VulkanDevice {
    type Encoder = VulkanEncoder;

    fn adapter_name(&self) -> String {
        self.device.adapter_name().to_string()
    }

    fn create_encoder(&self, queue: QueueKind) -> RhiResult<VulkanEncoder> {
        VulkanEncoder::new(self.device.clone(), self.registry.clone(), queue)
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> RhiResult<BufferId> {
        let buffer = Buffer::new(self.device.clone(), desc)?;
        if let Some(data) = initial_data {
            buffer.write_data(0, data)?;
        }
        Ok(self.registry()?.insert_buffer(buffer))
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> RhiResult<()> {
        self.registry()?.buffer(buffer)?.write_data(offset, data)
    }

    fn destroy_buffer(&self, buffer: BufferId) -> RhiResult<()> {
        self.registry()?.remove_buffer(buffer)
    }

    fn create_depth_buffer(&self, extent: Extent2D, format: Format) -> RhiResult<DepthBufferId> {
        let depth = DepthImage::new(self.device.clone(), extent, format)?;
        Ok(self.registry()?.insert_depth(depth))
    }

    fn destroy_depth_buffer(&self, depth: DepthBufferId) -> RhiResult<()> {
        self.registry()?.remove_depth(depth)
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<RootSignatureId> {
        let layout = RootLayout::new(self.device.clone(), desc)?;
        Ok(self.registry()?.insert_root_signature(layout))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<PipelineId> {
        let mut registry = self.registry()?;
        let layout = registry.root_signature(desc.root_signature)?.pipeline_layout();
        let pipeline = Pipeline::graphics(self.device.clone(), layout, desc)?;
        Ok(registry.insert_pipeline(pipeline, desc.root_signature))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> RhiResult<PipelineId> {
        let mut registry = self.registry()?;
        let layout = registry.root_signature(desc.root_signature)?.pipeline_layout();
        let pipeline = Pipeline::compute(self.device.clone(), layout, desc)?;
        Ok(registry.insert_pipeline(pipeline, desc.root_signature))
    }

    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapId> {
        let pool = DescriptorPool::new(self.device.clone(), capacity)?;
        Ok(self.registry()?.insert_heap(pool))
    }

    fn create_descriptor_table(
        &self,
        heap: DescriptorHeapId,
        root_signature: RootSignatureId,
        slot: u32,
        view: &ResourceView,
    ) -> RhiResult<DescriptorTableId> {
        let mut registry = self.registry()?;
        let layout = registry.root_signature(root_signature)?.table_layout(slot, view.kind())?;
        let buffer = registry.buffer(view.buffer())?.handle();
        let set = registry.heap_mut(heap)?.allocate(layout)?;
        DescriptorPool::write(&self.device, set, view, buffer);
        Ok(registry.insert_table(set))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
        assert_send_sync::<VulkanDevice>();
    }
}
