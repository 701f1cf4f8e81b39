//! Presentation surface of a native window.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::vulkan::instance::Instance;

/// A `VkSurfaceKHR` that keeps its instance alive.
///
/// The native window behind the raw handles must outlive the surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    _instance: Arc<Instance>,
}

impl Surface {
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the platform refuses the handles.
    pub fn new(
        instance: Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        // SAFETY: the handles come from a live window kept open by the caller.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
        }
        .map_err(|e| RhiError::SurfaceError(format!("{:?} window: {}", window, e)))?;
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        info!("Created presentation surface");

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("Destroyed presentation surface");
    }
}
