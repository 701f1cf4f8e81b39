//! Swapchain management.
//!
//! [`VulkanSwapChain`] owns the surface and the VkSwapchainKHR. It keeps one
//! image acquired at all times: after creation and after every present the
//! next image is acquired right away, so
//! [`SwapChain::current_back_buffer_index`] always names the image the next
//! frame renders into. The graphics queue consumes the acquire semaphore with
//! its first submission of the frame.
//!
//! Presentation waits on a per-image binary semaphore that an empty graphics
//! submission signals, so every command submitted before `present` is
//! ordered ahead of it.

use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::SwapChain;
use crate::error::{RhiError, RhiResult};
use crate::types::{Extent2D, Format, QueueKind};
use crate::vulkan::device::Device;
use crate::vulkan::instance::Instance;
use crate::vulkan::registry::{BackBuffer, Registry, SharedRegistry};
use crate::vulkan::surface::Surface;
use crate::vulkan::sync::Semaphore;
use crate::vulkan::{from_vk_format, to_vk_format};

/// Acquire semaphore the graphics queue must wait on before touching the
/// current image. Shared between the swap chain and the graphics queue.
#[derive(Default)]
pub struct PresentState {
    pending_acquire: Option<vk::Semaphore>,
}

pub type SharedPresent = Arc<Mutex<PresentState>>;

impl PresentState {
    pub fn lock(shared: &SharedPresent) -> RhiResult<MutexGuard<'_, PresentState>> {
        shared
            .lock()
            .map_err(|_| RhiError::InvalidState("present state mutex poisoned".to_string()))
    }

    /// Hand the pending acquire semaphore to the next submission.
    pub fn take_acquire(&mut self) -> Option<vk::Semaphore> {
        self.pending_acquire.take()
    }
}

/// What a surface offers on one adapter.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(physical_device: vk::PhysicalDevice, surface: &Surface) -> RhiResult<Self> {
        let loader = surface.loader();
        let surface = surface.handle();
        // SAFETY: the surface and adapter belong to the same live instance.
        let details = unsafe {
            Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            }
        };
        if details.formats.is_empty() || details.present_modes.is_empty() {
            return Err(RhiError::SwapchainError(format!(
                "Surface offers {} formats and {} present modes",
                details.formats.len(),
                details.present_modes.len()
            )));
        }
        debug!(
            "Surface support: {} formats, {:?}, images {}..{}",
            details.formats.len(),
            details.present_modes,
            details.capabilities.min_image_count,
            details.capabilities.max_image_count
        );
        Ok(details)
    }
}

/// The presentable image ring of the Vulkan backend.
pub struct VulkanSwapChain {
    device: Arc<Device>,
    registry: SharedRegistry,
    present: SharedPresent,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    /// Ring of acquire semaphores, one more than there are images
    acquire_semaphores: Vec<Semaphore>,
    next_acquire: usize,
    /// Present wait semaphore per image
    render_finished: Vec<Semaphore>,
    current: u32,
    format: Format,
    requested_format: Format,
    extent: Extent2D,
    requested_count: u32,
    sync_interval: u32,
    /// Destroyed after the swapchain
    surface: Surface,
}

impl VulkanSwapChain {
    /// Creates the swapchain and acquires its first image.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries, swapchain creation, image view
    /// creation or the first acquire fail.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: Surface,
        registry: SharedRegistry,
        present: SharedPresent,
        extent: Extent2D,
        buffer_count: u32,
        format: Format,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swap_chain = Self {
            device,
            registry,
            present,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            acquire_semaphores: Vec::new(),
            next_acquire: 0,
            render_finished: Vec::new(),
            current: 0,
            format,
            requested_format: format,
            extent,
            requested_count: buffer_count,
            sync_interval: 0,
            surface,
        };
        swap_chain.rebuild(extent)?;
        swap_chain.acquire()?;
        Ok(swap_chain)
    }

    /// Recreate the swapchain at `extent`, reusing the old one's resources.
    /// The device must be idle.
    fn rebuild(&mut self, extent: Extent2D) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(self.device.physical_device(), &self.surface)?;

        let surface_format = choose_surface_format(&support.formats, self.requested_format)?;
        let format = from_vk_format(surface_format.format).ok_or_else(|| {
            RhiError::SwapchainError(format!("Unsupported surface format {:?}", surface_format.format))
        })?;
        let present_mode = choose_present_mode(&support.present_modes, self.sync_interval);
        let vk_extent = choose_extent(&support.capabilities, extent.width, extent.height);
        let image_count = determine_image_count(&support.capabilities, self.requested_count);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            vk_extent.width, vk_extent.height, surface_format.format, present_mode, image_count
        );

        let graphics_family = self.device.queue_family(QueueKind::Graphics);
        let present_family = self
            .device
            .queue_families()
            .present_family
            .unwrap_or(graphics_family);
        let families = [graphics_family, present_family];
        let (sharing_mode, families) = if graphics_family == present_family {
            (vk::SharingMode::EXCLUSIVE, &families[..0])
        } else {
            (vk::SharingMode::CONCURRENT, &families[..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(vk_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, surface_format.format)?;
        info!("Swapchain created with {} images", self.images.len());

        self.acquire_semaphores = (0..=self.images.len())
            .map(|_| Semaphore::new(self.device.clone()))
            .collect::<RhiResult<_>>()?;
        self.render_finished = (0..self.images.len())
            .map(|_| Semaphore::new(self.device.clone()))
            .collect::<RhiResult<_>>()?;
        self.next_acquire = 0;

        self.format = format;
        self.extent = Extent2D::new(vk_extent.width, vk_extent.height);

        let back_buffers = self
            .images
            .iter()
            .zip(&self.image_views)
            .map(|(&image, &view)| BackBuffer { image, view })
            .collect();
        Registry::lock(&self.registry)?.set_back_buffers(back_buffers, vk_extent);

        Ok(())
    }

    /// Acquire the next image, recreating the swapchain once if it is out of date.
    fn acquire(&mut self) -> RhiResult<()> {
        for _ in 0..2 {
            let semaphore = self.acquire_semaphores[self.next_acquire].handle();
            let result = unsafe {
                self.swapchain_loader.acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    semaphore,
                    vk::Fence::null(),
                )
            };
            match result {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        debug!("Swapchain is suboptimal; recreated on next resize");
                    }
                    self.current = index;
                    self.next_acquire = (self.next_acquire + 1) % self.acquire_semaphores.len();
                    PresentState::lock(&self.present)?.pending_acquire = Some(semaphore);
                    return Ok(());
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    warn!("Swapchain out of date during acquire, recreating");
                    self.device.wait_idle()?;
                    self.rebuild(self.extent)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RhiError::SwapchainError(
            "Swapchain stayed out of date after recreation".to_string(),
        ))
    }

    /// Submit an empty batch on the graphics queue.
    fn submit_empty(&self, wait: Option<vk::Semaphore>, signal: Option<vk::Semaphore>) -> RhiResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device.handle().queue_submit(
                self.device.queue(QueueKind::Graphics),
                &[submit],
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }

    /// Consume an acquire no submission waited on, then idle the device.
    fn drain(&mut self) -> RhiResult<()> {
        let pending = PresentState::lock(&self.present)?.take_acquire();
        if pending.is_some() {
            self.submit_empty(pending, None)?;
        }
        self.device.wait_idle()
    }

    /// Destroys all image views.
    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl SwapChain for VulkanSwapChain {
    fn buffer_count(&self) -> u32 {
        self.images.len() as u32
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

    fn present(&mut self, sync_interval: u32) -> RhiResult<()> {
        let image = self.current as usize;
        let render_finished = self.render_finished[image].handle();
        let pending = PresentState::lock(&self.present)?.take_acquire();
        self.submit_empty(pending, Some(render_finished))?;

        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.current];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        let stale = match result {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };

        if stale || sync_interval != self.sync_interval {
            self.sync_interval = sync_interval;
            self.drain()?;
            self.rebuild(self.extent)?;
        }

        self.acquire()
    }

    fn resize(&mut self, buffer_count: u32, extent: Extent2D) -> RhiResult<()> {
        if extent.is_empty() {
            return Err(RhiError::SwapchainError(format!(
                "Cannot resize swapchain to {}x{}",
                extent.width, extent.height
            )));
        }
        self.drain()?;
        self.requested_count = buffer_count;
        self.rebuild(extent)?;
        self.acquire()
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            warn!("Swapchain teardown could not idle the device: {}", e);
        }
        self.destroy_image_views();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }

            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Chooses the surface format.
///
/// Prefers `requested` with SRGB_NONLINEAR color space, then the other
/// formats the framework can name.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    requested: Format,
) -> RhiResult<vk::SurfaceFormatKHR> {
    let wanted = to_vk_format(requested);
    let preferred = formats
        .iter()
        .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR);

    if let Some(&format) = preferred {
        debug!("Selected requested surface format: {:?}", wanted);
        return Ok(format);
    }

    if let Some(&format) = formats.iter().find(|f| from_vk_format(f.format).is_some()) {
        warn!("Using fallback surface format: {:?}", format.format);
        return Ok(format);
    }

    Err(RhiError::SwapchainError(format!(
        "No usable surface format among {} offered",
        formats.len()
    )))
}

/// Chooses the present mode for a sync interval.
///
/// Interval 0 presents without waiting for vertical blank: IMMEDIATE, then
/// MAILBOX. Any other interval, or a surface without those, uses FIFO,
/// which every implementation supports.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], sync_interval: u32) -> vk::PresentModeKHR {
    if sync_interval == 0 {
        for mode in [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX] {
            if present_modes.contains(&mode) {
                debug!("Selected {:?} present mode", mode);
                return mode;
            }
        }
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Clamps the requested image count to what the surface allows.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);

    // If max_image_count is 0, there's no maximum
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Creates image views for swapchain images.
fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range());

        let image_view = unsafe {
            device
                .handle()
                .create_image_view(&create_info, None)
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {}: {:?}", i, e))
                })?
        };

        image_views.push(image_view);
    }

    Ok(image_views)
}

/// The whole color aspect of a single-level image.
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_requested() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats, Format::Bgra8Unorm).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats, Format::Bgra8Unorm).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);

        let unusable = vec![surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert!(choose_surface_format(&unusable, Format::Bgra8Unorm).is_err());
    }

    #[test]
    fn test_interval_zero_prefers_immediate() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, 0), vk::PresentModeKHR::IMMEDIATE);

        let no_immediate = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&no_immediate, 0), vk::PresentModeKHR::MAILBOX);

        let fifo_only = vec![vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only, 0), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_nonzero_interval_uses_fifo() {
        let modes = vec![vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, 1), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn test_determine_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&bounded, 5), 3);
        assert_eq!(determine_image_count(&bounded, 1), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded, 5), 5);
    }
}
