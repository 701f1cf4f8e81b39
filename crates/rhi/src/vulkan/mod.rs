//! Vulkan backend.
//!
//! Maps the backend-neutral model onto Vulkan 1.3:
//! - The fence is a timeline semaphore shared by both queues
//! - Root signature slot `n` is descriptor set `n`; descriptor heaps are
//!   descriptor pools
//! - Render targets use dynamic rendering, barriers use synchronization2
//!
//! [`VulkanBackend`] is created on the thread that owns the window and then
//! moved to the render thread, where [`Backend::into_context`] builds the
//! device, queues, fence and swap chain.

mod buffer;
mod command;
mod depth;
mod descriptor;
mod device;
mod instance;
mod memory;
mod physical_device;
mod pipeline;
mod queue;
mod registry;
mod shader;
mod surface;
mod swapchain;
mod sync;

use std::sync::{Arc, Mutex};

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

use crate::backend::{Backend, ContextDesc};
use crate::context::DeviceContext;
use crate::error::RhiResult;
use crate::types::{Format, QueueKind};

pub use command::{StateScope, VulkanEncoder};
pub use device::{Device, VulkanDevice};
pub use instance::Instance;
pub use physical_device::{AdapterPreference, PhysicalDeviceInfo, QueueFamilyIndices};
pub use queue::VulkanQueue;
pub use surface::Surface;
pub use swapchain::{SwapchainSupportDetails, VulkanSwapChain};
pub use sync::TimelineFence;

use physical_device::select_physical_device;
use registry::Registry;
use swapchain::PresentState;

/// Vulkan format of a neutral format.
pub(crate) fn to_vk_format(format: Format) -> vk::Format {
    match format {
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::D32Float => vk::Format::D32_SFLOAT,
    }
}

/// Neutral format of a Vulkan format, if the framework has a name for it.
pub(crate) fn from_vk_format(format: vk::Format) -> Option<Format> {
    match format {
        vk::Format::B8G8R8A8_UNORM => Some(Format::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(Format::Bgra8Srgb),
        vk::Format::R8G8B8A8_UNORM => Some(Format::Rgba8Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(Format::Rgba16Float),
        vk::Format::D32_SFLOAT => Some(Format::D32Float),
        _ => None,
    }
}

/// Instance and surface of a window, waiting to become a device context.
pub struct VulkanBackend {
    instance: Arc<Instance>,
    surface: Surface,
    preference: AdapterPreference,
}

impl VulkanBackend {
    /// Create the instance and a surface for the window.
    ///
    /// # Errors
    ///
    /// Returns an error if Vulkan cannot be loaded or the surface cannot be
    /// created.
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        preference: AdapterPreference,
        enable_validation: bool,
    ) -> RhiResult<Self> {
        let instance = Arc::new(Instance::new(app_name, display, enable_validation)?);
        let surface = Surface::new(Arc::clone(&instance), display, window)?;
        Ok(Self {
            instance,
            surface,
            preference,
        })
    }
}

impl Backend for VulkanBackend {
    type Device = VulkanDevice;
    type Encoder = VulkanEncoder;
    type Queue = VulkanQueue;
    type Signal = TimelineFence;
    type SwapChain = VulkanSwapChain;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn into_context(self, desc: &ContextDesc) -> RhiResult<DeviceContext<Self>> {
        info!(
            "Creating Vulkan context '{}' ({}x{}, {} buffers, compute queue: {})",
            desc.label, desc.extent.width, desc.extent.height, desc.buffer_count, desc.compute_queue
        );

        let physical = select_physical_device(
            self.instance.handle(),
            self.surface.handle(),
            self.surface.loader(),
            self.preference,
        )?;
        let device = Device::new(Arc::clone(&self.instance), &physical)?;

        let registry = Registry::shared();
        let present = Arc::new(Mutex::new(PresentState::default()));
        let swap_chain = VulkanSwapChain::new(
            &self.instance,
            Arc::clone(&device),
            self.surface,
            Arc::clone(&registry),
            Arc::clone(&present),
            desc.extent,
            desc.buffer_count,
            desc.format,
        )?;

        let graphics = VulkanQueue::new(Arc::clone(&device), QueueKind::Graphics, Some(present));
        let compute = desc
            .compute_queue
            .then(|| VulkanQueue::new(Arc::clone(&device), QueueKind::Compute, None));
        let fence = TimelineFence::new(Arc::clone(&device))?;

        Ok(DeviceContext::from_parts(
            VulkanDevice::new(device, registry),
            graphics,
            compute,
            fence,
            swap_chain,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping_round_trips() {
        for format in [
            Format::Bgra8Unorm,
            Format::Bgra8Srgb,
            Format::Rgba8Unorm,
            Format::Rgba16Float,
            Format::D32Float,
        ] {
            assert_eq!(from_vk_format(to_vk_format(format)), Some(format));
        }
        assert_eq!(from_vk_format(vk::Format::A2B10G10R10_UNORM_PACK32), None);
    }
}
