//! Windowed launcher shared by the sample binaries.
//!
//! The main thread owns the window and runs the winit message pump. The
//! sample runs on a dedicated render thread. The two threads share only:
//! - a [`FrameControl`] carrying the resize request and the stop and error
//!   flags
//! - a channel of mouse [`InputEvent`]s towards the render thread
//! - an event loop proxy carrying the caption and a "stopped" notice back

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event_loop::{ControlFlow, EventLoop, EventLoopProxy};
use winit::window::WindowId;

use lockstep_core::LaunchOptions;
use lockstep_platform::{ActiveEventLoop, FrameControl, InputEvent, Window, WindowEvent};
use lockstep_renderer::{RenderLoop, Sample};
use lockstep_rhi::vulkan::{AdapterPreference, VulkanBackend};
use lockstep_rhi::{Extent2D, RhiResult, ShaderLoader, SpirvDirectory};

/// Minimum time between caption updates.
const TITLE_INTERVAL: Duration = Duration::from_millis(250);

/// Builds a sample on the render thread from the backend, the shader loader,
/// the initial client size and the window title.
trait SampleFactory: Send + 'static {
    type Sample: Sample;

    fn build(
        self,
        backend: VulkanBackend,
        shaders: Box<dyn ShaderLoader>,
        extent: Extent2D,
        title: String,
    ) -> RhiResult<Self::Sample>;
}

impl<F, S> SampleFactory for F
where
    F: FnOnce(VulkanBackend, Box<dyn ShaderLoader>, Extent2D, String) -> RhiResult<S>
        + Send
        + 'static,
    S: Sample,
{
    type Sample = S;

    fn build(
        self,
        backend: VulkanBackend,
        shaders: Box<dyn ShaderLoader>,
        extent: Extent2D,
        title: String,
    ) -> RhiResult<S> {
        self(backend, shaders, extent, title)
    }
}

/// Messages from the render thread to the message pump.
#[derive(Debug)]
enum RenderNotice {
    Caption(String),
    Stopped,
}

struct Launcher<F: SampleFactory> {
    title: String,
    options: LaunchOptions,
    factory: Option<F>,
    control: Arc<FrameControl>,
    proxy: EventLoopProxy<RenderNotice>,
    window: Option<Window>,
    input: Option<Sender<InputEvent>>,
    render_thread: Option<JoinHandle<()>>,
}

impl<F: SampleFactory> Launcher<F> {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let title = self.options.decorate_title(&self.title);
        let window = Window::new(event_loop, self.options.width, self.options.height, &title)?;
        let (display, handle) = window.raw_handles()?;
        let preference = if self.options.warp {
            AdapterPreference::Software
        } else {
            AdapterPreference::Hardware
        };
        let backend = VulkanBackend::new(
            &self.title,
            display,
            handle,
            preference,
            cfg!(debug_assertions),
        )
        .context("creating the Vulkan instance and surface")?;
        let shaders = SpirvDirectory::locate(self.options.shader_dir.as_deref())
            .context("locating compiled shaders")?;

        let factory = self
            .factory
            .take()
            .context("the render thread was already started")?;
        let extent = Extent2D::new(window.width(), window.height());
        let control = Arc::clone(&self.control);
        let proxy = self.proxy.clone();
        let (input, events) = mpsc::channel();

        let render_thread = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let mut last_caption: Option<Instant> = None;
                let title_sink = |caption: &str| {
                    if last_caption.is_none_or(|at| at.elapsed() >= TITLE_INTERVAL) {
                        last_caption = Some(Instant::now());
                        let _ = proxy.send_event(RenderNotice::Caption(caption.to_string()));
                    }
                };

                let outcome = factory
                    .build(backend, Box::new(shaders), extent, title)
                    .and_then(|mut sample| {
                        RenderLoop::new(Arc::clone(&control))
                            .with_events(events)
                            .run(&mut sample, title_sink)
                    });
                match outcome {
                    Ok(stats) => info!(
                        "Render thread finished: {} frames, {:.1} ms/frame",
                        stats.frames, stats.frame_ms
                    ),
                    Err(e) => {
                        error!("Render thread failed: {}", e);
                        control.set_error();
                        control.set_exit_code(1);
                    }
                }
                let _ = proxy.send_event(RenderNotice::Stopped);
            })
            .context("spawning the render thread")?;

        self.window = Some(window);
        self.input = Some(input);
        self.render_thread = Some(render_thread);
        Ok(())
    }

    fn join_render_thread(&mut self) {
        if let Some(handle) = self.render_thread.take()
            && handle.join().is_err()
        {
            error!("Render thread panicked");
            self.control.set_error();
            self.control.set_exit_code(1);
        }
    }
}

impl<F: SampleFactory> ApplicationHandler<RenderNotice> for Launcher<F> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.factory.is_none() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            error!("Startup failed: {:#}", e);
            self.control.set_error();
            self.control.set_exit_code(1);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("Close requested, stopping the render thread");
                self.control.request_stop();
                if self.render_thread.is_none() {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                self.control.request_resize(size.width, size.height);
            }
            ref other => {
                if let (Some(input), Some(event)) = (&self.input, InputEvent::from_window_event(other))
                    && input.send(event).is_err()
                {
                    warn!("Render thread is gone, dropping input");
                    self.input = None;
                }
            }
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, notice: RenderNotice) {
        match notice {
            RenderNotice::Caption(caption) => {
                if let Some(window) = &self.window {
                    window.set_title(&caption);
                }
            }
            RenderNotice::Stopped => {
                self.join_render_thread();
                event_loop.exit();
            }
        }
    }
}

/// Open a window titled `title` and run the sample `factory` builds until
/// the window closes or the sample fails.
///
/// Returns the low byte of the recorded exit code as the process status.
pub fn run<S, F>(title: &str, factory: F) -> Result<ExitCode>
where
    S: Sample,
    F: FnOnce(VulkanBackend, Box<dyn ShaderLoader>, Extent2D, String) -> RhiResult<S>
        + Send
        + 'static,
{
    lockstep_core::init_logging();
    let options = LaunchOptions::from_env();
    info!("Starting {} ({:?})", title, options);

    let event_loop = EventLoop::<RenderNotice>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let control = Arc::new(FrameControl::new());
    let mut launcher = Launcher {
        title: title.to_string(),
        options,
        factory: Some(factory),
        control: Arc::clone(&control),
        proxy: event_loop.create_proxy(),
        window: None,
        input: None,
        render_thread: None,
    };
    event_loop.run_app(&mut launcher)?;

    control.request_stop();
    launcher.join_render_thread();
    Ok(exit_status(control.exit_code()))
}

/// Process status for a recorded exit code: its low byte.
pub fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(status_byte(code))
}

fn status_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte_keeps_low_byte() {
        assert_eq!(status_byte(0), 0);
        assert_eq!(status_byte(1), 1);
        assert_eq!(status_byte(0x1ff), 0xff);
        assert_eq!(status_byte(256), 0);
        assert_eq!(status_byte(-1), 0xff);
    }
}
