//! The render-thread loop.
//!
//! ```text
//!   on_init
//!   while !stopped && !error:
//!       frame stats -> title
//!       pending resize? -> on_size_changed
//!       pending input   -> on_event
//!       on_update
//!       on_render            (ends with the frame's fence wait)
//!   on_destroy               (final drain)
//! ```
//!
//! The stop flag is only checked between frames, so a frame that has started
//! always finishes its wait.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use tracing::{debug, info};

use lockstep_core::{FrameStats, Timer};
use lockstep_platform::{FrameControl, InputEvent};
use lockstep_rhi::{Extent2D, RhiResult, TraceExt};

use crate::sample::Sample;

/// Summary of a finished run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopStats {
    /// Frames rendered.
    pub frames: u64,
    /// Smoothed frame time at exit, in milliseconds.
    pub frame_ms: f64,
}

/// Drives a [`Sample`] until the control flags say stop.
pub struct RenderLoop {
    control: Arc<FrameControl>,
    events: Option<Receiver<InputEvent>>,
    frame_limit: Option<u64>,
    stats: FrameStats,
    timer: Timer,
}

impl RenderLoop {
    pub fn new(control: Arc<FrameControl>) -> Self {
        Self {
            control,
            events: None,
            frame_limit: None,
            stats: FrameStats::new(),
            timer: Timer::new(),
        }
    }

    /// Deliver input from the message thread to `Sample::on_event`.
    pub fn with_events(mut self, events: Receiver<InputEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Request a stop after `frames` frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Run `sample` to completion.
    ///
    /// `title_sink` receives the window caption once per frame. A failure in
    /// `on_init`, `on_size_changed` or `on_render` raises the error flag and
    /// ends the loop; `on_destroy` still runs unless `on_init` failed.
    pub fn run<S, F>(mut self, sample: &mut S, mut title_sink: F) -> RhiResult<LoopStats>
    where
        S: Sample,
        F: FnMut(&str),
    {
        let title = sample.title().to_string();
        if let Err(err) = sample.on_init().traced("Sample::on_init") {
            self.control.set_error();
            return Err(err);
        }
        info!("{} initialized", title);

        self.timer.reset();
        let mut frames = 0u64;
        let mut outcome = Ok(());

        while !self.control.is_stopped() && !self.control.has_error() {
            let delta = self.timer.tick();
            self.stats.record(delta);
            title_sink(&self.stats.caption(&title));

            if let Some((width, height)) = self.control.take_resize() {
                let extent = Extent2D::new(width, height);
                if let Err(err) = sample.on_size_changed(extent).traced("Sample::on_size_changed") {
                    self.control.set_error();
                    outcome = Err(err);
                    break;
                }
                info!("Window resize to {} x {}", width, height);
            }

            if let Some(events) = &self.events {
                for event in events.try_iter() {
                    sample.on_event(&event);
                }
            }

            sample.on_update(delta);
            if let Err(err) = sample.on_render().traced("Sample::on_render") {
                self.control.set_error();
                outcome = Err(err);
                break;
            }

            frames += 1;
            if self.frame_limit.is_some_and(|limit| frames >= limit) {
                debug!("Frame limit {} reached", frames);
                self.control.request_stop();
            }
        }

        let destroyed = sample.on_destroy().traced("Sample::on_destroy");
        info!("{} stopped after {} frames", title, frames);
        outcome?;
        destroyed?;
        Ok(LoopStats {
            frames,
            frame_ms: self.stats.frame_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use lockstep_platform::MouseButton;
    use lockstep_rhi::RhiError;

    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Vec<String>,
        fail_init: bool,
        fail_render_at: Option<usize>,
        renders: usize,
        stop_after: Option<(Arc<FrameControl>, usize)>,
    }

    impl Sample for Recording {
        fn title(&self) -> &str {
            "Recording"
        }

        fn on_init(&mut self) -> RhiResult<()> {
            self.calls.push("init".into());
            if self.fail_init {
                return Err(RhiError::NoSuitableGpu);
            }
            Ok(())
        }

        fn on_size_changed(&mut self, extent: Extent2D) -> RhiResult<()> {
            self.calls.push(format!("size {}x{}", extent.width, extent.height));
            Ok(())
        }

        fn on_update(&mut self, _delta: Duration) {
            self.calls.push("update".into());
        }

        fn on_render(&mut self) -> RhiResult<()> {
            self.calls.push("render".into());
            self.renders += 1;
            if self.fail_render_at == Some(self.renders) {
                return Err(RhiError::InvalidState("lost".into()));
            }
            if let Some((control, after)) = &self.stop_after
                && self.renders == *after
            {
                control.request_stop();
            }
            Ok(())
        }

        fn on_destroy(&mut self) -> RhiResult<()> {
            self.calls.push("destroy".into());
            Ok(())
        }

        fn on_event(&mut self, event: &InputEvent) -> bool {
            self.calls.push(format!("event {:?}", event));
            true
        }
    }

    #[test]
    fn test_frame_limit_runs_exact_frames() {
        let control = Arc::new(FrameControl::new());
        let mut sample = Recording::default();
        let stats = RenderLoop::new(control.clone())
            .with_frame_limit(3)
            .run(&mut sample, |_| {})
            .unwrap();

        assert_eq!(stats.frames, 3);
        assert_eq!(sample.renders, 3);
        assert!(control.is_stopped());
        assert!(!control.has_error());
        assert_eq!(sample.calls.first().map(String::as_str), Some("init"));
        assert_eq!(sample.calls.last().map(String::as_str), Some("destroy"));
    }

    #[test]
    fn test_stop_finishes_current_frame_then_drains() {
        let control = Arc::new(FrameControl::new());
        let mut sample = Recording {
            stop_after: Some((control.clone(), 2)),
            ..Default::default()
        };
        let stats = RenderLoop::new(control).run(&mut sample, |_| {}).unwrap();

        assert_eq!(stats.frames, 2);
        assert_eq!(
            sample.calls,
            ["init", "update", "render", "update", "render", "destroy"]
        );
    }

    #[test]
    fn test_resize_precedes_update_and_render() {
        let control = Arc::new(FrameControl::new());
        control.request_resize(640, 480);
        let mut sample = Recording::default();
        RenderLoop::new(control.clone())
            .with_frame_limit(1)
            .run(&mut sample, |_| {})
            .unwrap();

        assert_eq!(
            sample.calls,
            ["init", "size 640x480", "update", "render", "destroy"]
        );
        assert_eq!(control.take_resize(), None);
    }

    #[test]
    fn test_events_are_delivered_before_update() {
        let control = Arc::new(FrameControl::new());
        let (tx, rx) = mpsc::channel();
        tx.send(InputEvent::MouseDown(MouseButton::Left)).unwrap();
        let mut sample = Recording::default();
        RenderLoop::new(control)
            .with_events(rx)
            .with_frame_limit(1)
            .run(&mut sample, |_| {})
            .unwrap();

        assert_eq!(sample.calls[1], "event MouseDown(Left)");
        assert_eq!(sample.calls[2], "update");
    }

    #[test]
    fn test_init_failure_sets_error_and_skips_frames() {
        let control = Arc::new(FrameControl::new());
        let mut sample = Recording {
            fail_init: true,
            ..Default::default()
        };
        let result = RenderLoop::new(control.clone()).run(&mut sample, |_| {});

        assert!(matches!(result, Err(RhiError::NoSuitableGpu)));
        assert!(control.has_error());
        assert_eq!(sample.calls, ["init"]);
    }

    #[test]
    fn test_render_failure_sets_error_and_still_destroys() {
        let control = Arc::new(FrameControl::new());
        let mut sample = Recording {
            fail_render_at: Some(2),
            ..Default::default()
        };
        let result = RenderLoop::new(control.clone()).run(&mut sample, |_| {});

        assert!(matches!(result, Err(RhiError::InvalidState(_))));
        assert!(control.has_error());
        assert_eq!(sample.renders, 2);
        assert_eq!(sample.calls.last().map(String::as_str), Some("destroy"));
    }

    #[test]
    fn test_caption_reaches_title_sink() {
        let control = Arc::new(FrameControl::new());
        let mut sample = Recording::default();
        let mut captions = Vec::new();
        RenderLoop::new(control)
            .with_frame_limit(2)
            .run(&mut sample, |caption| captions.push(caption.to_string()))
            .unwrap();

        assert_eq!(captions.len(), 2);
        assert!(captions.iter().all(|c| c.starts_with("Recording - ")));
        assert!(captions[0].ends_with("fps"));
    }
}
