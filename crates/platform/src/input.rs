//! Mouse input forwarded from the message pump to the render thread.

use winit::event::{ElementState, MouseScrollDelta, WindowEvent};

/// Lines per wheel notch reported by pixel-based scroll devices.
const PIXELS_PER_LINE: f32 = 120.0;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// An input notification, detached from winit so it can cross threads and
/// be synthesized in tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    /// Cursor position in client pixels.
    MouseMove { x: f32, y: f32 },
    /// Wheel movement in notches, positive away from the user.
    Wheel(f32),
}

impl InputEvent {
    /// Translate a window event, if it is one the samples consume.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::MouseInput { state, button, .. } => {
                let button = mouse_button(*button)?;
                Some(match state {
                    ElementState::Pressed => InputEvent::MouseDown(button),
                    ElementState::Released => InputEvent::MouseUp(button),
                })
            }
            WindowEvent::CursorMoved { position, .. } => Some(InputEvent::MouseMove {
                x: position.x as f32,
                y: position.y as f32,
            }),
            WindowEvent::MouseWheel { delta, .. } => Some(InputEvent::Wheel(match delta {
                MouseScrollDelta::LineDelta(_, y) => *y,
                MouseScrollDelta::PixelDelta(position) => position.y as f32 / PIXELS_PER_LINE,
            })),
            _ => None,
        }
    }
}

fn mouse_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    match button {
        winit::event::MouseButton::Left => Some(MouseButton::Left),
        winit::event::MouseButton::Right => Some(MouseButton::Right),
        winit::event::MouseButton::Middle => Some(MouseButton::Middle),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mouse_button_mapping() {
        assert_eq!(mouse_button(winit::event::MouseButton::Left), Some(MouseButton::Left));
        assert_eq!(mouse_button(winit::event::MouseButton::Middle), Some(MouseButton::Middle));
        assert_eq!(mouse_button(winit::event::MouseButton::Back), None);
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        assert_eq!(InputEvent::from_window_event(&WindowEvent::CloseRequested), None);
        assert_eq!(
            InputEvent::from_window_event(&WindowEvent::Focused(true)),
            None
        );
    }
}
