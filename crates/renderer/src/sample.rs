//! Lifecycle hooks a sample implements.

use std::time::Duration;

use lockstep_platform::InputEvent;
use lockstep_rhi::{Extent2D, RhiResult};

/// A sample driven by [`crate::RenderLoop`] on the render thread.
///
/// Every hook runs on the render thread, one at a time. The loop never
/// interrupts `on_render`, so a sample may rely on its own end-of-frame wait
/// having completed before the next hook runs.
pub trait Sample {
    /// Window title, without the frame-time suffix.
    fn title(&self) -> &str;

    /// Create the device context and every GPU object.
    fn on_init(&mut self) -> RhiResult<()>;

    /// Rebuild size-dependent resources for a new back-buffer size.
    fn on_size_changed(&mut self, extent: Extent2D) -> RhiResult<()>;

    /// Advance CPU-side state by `delta`.
    fn on_update(&mut self, delta: Duration);

    /// Record, submit and present one frame, then wait for it.
    fn on_render(&mut self) -> RhiResult<()>;

    /// Drain the GPU before teardown.
    fn on_destroy(&mut self) -> RhiResult<()>;

    /// Handle an input event. Returns true if the event was consumed.
    fn on_event(&mut self, event: &InputEvent) -> bool {
        let _ = event;
        false
    }
}
