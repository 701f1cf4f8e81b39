//! Platform abstraction layer.
//!
//! This crate provides:
//! - Window creation and raw handles for surface creation
//! - Mouse input translated off winit events
//! - Flags shared between the message thread and the render thread

mod control;
mod input;
mod window;

pub use control::FrameControl;
pub use input::{InputEvent, MouseButton};
pub use window::Window;

// Re-export winit types that applications need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
