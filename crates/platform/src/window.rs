//! Window management using winit.
//!
//! The window lives on the main thread, which runs the message pump. The
//! render thread only ever sees the raw handles captured at startup.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use lockstep_core::{Error, Result};

/// A resizable top-level window and its last known client size.
pub struct Window {
    window: WinitWindow,
    size: PhysicalSize<u32>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);
        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honour the requested size exactly.
        let size = window.inner_size();
        info!("Created window '{}': {}x{}", title, size.width, size.height);

        Ok(Self { window, size })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// Record a new client size from a `Resized` event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = PhysicalSize::new(width, height);
        debug!("Window resized: {}x{}", width, height);
    }

    /// Width over height, 1.0 while minimised.
    pub fn aspect_ratio(&self) -> f32 {
        aspect_ratio(self.size.width, self.size.height)
    }

    /// Raw display and window handles for surface creation.
    ///
    /// The handles stay valid for as long as this window exists.
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {}", e)))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {}", e)))?;
        Ok((display.as_raw(), window.as_raw()))
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }
}

fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_ratio() {
        assert!((aspect_ratio(1280, 720) - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(aspect_ratio(800, 0), 1.0);
        assert_eq!(aspect_ratio(0, 600), 1.0);
    }
}
