//! Flags shared between the message thread and the render thread.
//!
//! The message thread only ever writes; the render thread polls between
//! frames. Nothing here blocks.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Cross-thread frame control, shared in an `Arc`.
#[derive(Debug, Default)]
pub struct FrameControl {
    resize_pending: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    stop: AtomicBool,
    error: AtomicBool,
    exit_code: AtomicI32,
}

impl FrameControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new client size for the render thread.
    ///
    /// The size is stored before the flag is raised, so a reader that
    /// observes the flag with `Acquire` also observes the size. Minimised
    /// windows report a zero extent and are ignored.
    pub fn request_resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            tracing::trace!("Ignoring zero-sized resize {}x{}", width, height);
            return;
        }
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
        self.resize_pending.store(true, Ordering::Release);
    }

    /// Consume a pending resize, returning the latest requested size.
    pub fn take_resize(&self) -> Option<(u32, u32)> {
        if self.resize_pending.swap(false, Ordering::Acquire) {
            Some((
                self.width.load(Ordering::Relaxed),
                self.height.load(Ordering::Relaxed),
            ))
        } else {
            None
        }
    }

    /// Ask the render loop to finish after the current frame.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Record that the render thread hit a fatal error.
    pub fn set_error(&self) {
        self.error.store(true, Ordering::Release);
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Relaxed);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resize_is_taken_once() {
        let control = FrameControl::new();
        assert_eq!(control.take_resize(), None);

        control.request_resize(800, 600);
        assert_eq!(control.take_resize(), Some((800, 600)));
        assert_eq!(control.take_resize(), None);
    }

    #[test]
    fn test_latest_resize_wins() {
        let control = FrameControl::new();
        control.request_resize(800, 600);
        control.request_resize(1024, 768);
        assert_eq!(control.take_resize(), Some((1024, 768)));
    }

    #[test]
    fn test_minimised_resize_is_ignored() {
        let control = FrameControl::new();
        control.request_resize(0, 600);
        control.request_resize(800, 0);
        assert_eq!(control.take_resize(), None);
    }

    #[test]
    fn test_stop_and_error_flags() {
        let control = FrameControl::new();
        assert!(!control.is_stopped());
        assert!(!control.has_error());

        control.request_stop();
        control.set_error();
        assert!(control.is_stopped());
        assert!(control.has_error());
    }

    #[test]
    fn test_exit_code_round_trip() {
        let control = FrameControl::new();
        assert_eq!(control.exit_code(), 0);
        control.set_exit_code(3);
        assert_eq!(control.exit_code(), 3);
    }

    #[test]
    fn test_resize_visible_across_threads() {
        let control = Arc::new(FrameControl::new());
        let writer = {
            let control = control.clone();
            thread::spawn(move || control.request_resize(640, 480))
        };
        writer.join().unwrap();
        assert_eq!(control.take_resize(), Some((640, 480)));
    }
}
