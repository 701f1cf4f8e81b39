//! Orbit camera driven by mouse input.

use std::f32::consts::FRAC_PI_4;

use glam::{Mat4, Vec2, Vec3};
use lockstep_platform::{InputEvent, MouseButton};

/// Vertical field of view used by both samples.
pub const DEFAULT_FOV_Y: f32 = FRAC_PI_4;
pub const DEFAULT_NEAR: f32 = 0.01;
pub const DEFAULT_FAR: f32 = 1250.0;

/// Radians of orbit per pixel of mouse drag.
const ROTATE_SPEED: f32 = 0.01;
/// Distance scale per wheel notch.
const ZOOM_STEP: f32 = 0.9;
const MIN_RADIUS: f32 = 0.1;
/// Keeps the eye off the poles, where the up vector degenerates.
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// A left-handed look-at camera orbiting a fixed target.
///
/// Dragging with the left button orbits, the wheel moves the eye towards or
/// away from the target. Projection depth maps to `[0, 1]`.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    target: Vec3,
    radius: f32,
    yaw: f32,
    pitch: f32,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
    cursor: Option<Vec2>,
    dragging: bool,
}

impl OrbitCamera {
    /// Camera at `eye` looking at `target`, with the default projection.
    pub fn new(eye: Vec3, target: Vec3) -> Self {
        let offset = eye - target;
        let radius = offset.length().max(MIN_RADIUS);
        Self {
            target,
            radius,
            yaw: offset.x.atan2(offset.z),
            pitch: (offset.y / radius).clamp(-1.0, 1.0).asin(),
            fov_y: DEFAULT_FOV_Y,
            aspect: 1.0,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            cursor: None,
            dragging: false,
        }
    }

    /// Set the perspective projection.
    pub fn set_projection(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
    }

    /// Update the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Eye position in world space.
    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.radius * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    #[inline]
    pub fn target(&self) -> Vec3 {
        self.target
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_lh(self.eye(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_lh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// `projection * view`, for column vectors.
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Feed a mouse event. Returns true if the camera moved.
    pub fn handle_event(&mut self, event: &InputEvent) -> bool {
        match *event {
            InputEvent::MouseDown(MouseButton::Left) => {
                self.dragging = true;
                false
            }
            InputEvent::MouseUp(MouseButton::Left) => {
                self.dragging = false;
                false
            }
            InputEvent::MouseMove { x, y } => {
                let position = Vec2::new(x, y);
                let previous = self.cursor.replace(position);
                match previous {
                    Some(previous) if self.dragging => {
                        self.orbit(position - previous);
                        true
                    }
                    _ => false,
                }
            }
            InputEvent::Wheel(notches) if notches != 0.0 => {
                self.radius = (self.radius * ZOOM_STEP.powf(notches)).max(MIN_RADIUS);
                true
            }
            _ => false,
        }
    }

    fn orbit(&mut self, delta: Vec2) {
        self.yaw += delta.x * ROTATE_SPEED;
        self.pitch = (self.pitch + delta.y * ROTATE_SPEED).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }
}
