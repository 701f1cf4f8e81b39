//! Depth buffer images.
//!
//! The image starts in `UNDEFINED` layout; the encoder moves it to the depth
//! attachment layout the first time a recording clears it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::types::{Extent2D, Format};
use crate::vulkan::device::Device;
use crate::vulkan::memory::BoundMemory;
use crate::vulkan::to_vk_format;

/// A GPU-only depth image with a view over its depth aspect.
pub struct DepthImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    extent: Extent2D,
    // Dropped after the image is destroyed.
    _memory: BoundMemory,
}

impl DepthImage {
    /// # Errors
    ///
    /// Rejects an empty extent or a color format, and propagates image,
    /// memory and view creation failures.
    pub fn new(device: Arc<Device>, extent: Extent2D, format: Format) -> RhiResult<Self> {
        if extent.is_empty() {
            return Err(RhiError::InvalidHandle(format!(
                "Depth buffer extent {}x{} is empty",
                extent.width, extent.height
            )));
        }
        if !format.is_depth() {
            return Err(RhiError::InvalidHandle(format!("{:?} is not a depth format", format)));
        }
        let vk_format = to_vk_format(format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let memory = BoundMemory::image(&device, image, "depth buffer")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .subresource_range(depth_subresource_range());
        let view = match unsafe { device.handle().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        info!("Created {}x{} depth buffer ({:?})", extent.width, extent.height, format);
        Ok(Self {
            device,
            image,
            view,
            extent,
            _memory: memory,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.view
    }
}

/// The whole depth aspect of a single-level image.
pub(crate) fn depth_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::DEPTH)
        .level_count(1)
        .layer_count(1)
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
            self.device.handle().destroy_image(self.image, None);
        }
        debug!("Destroyed {}x{} depth buffer", self.extent.width, self.extent.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_subresource_range() {
        let range = depth_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
