//! Frame orchestration.
//!
//! This crate drives GPU work frame by frame:
//! - The [`Sample`] lifecycle hooks and the [`RenderLoop`] that calls them
//! - Size-dependent state and the back-buffer index policy
//! - An orbit camera and the constant buffer layouts
//! - The rotating cube and volumetric animation samples

pub mod camera;
pub mod frame;
pub mod render_loop;
pub mod sample;
pub mod samples;
pub mod ubo;

pub use camera::OrbitCamera;
pub use frame::{FrameIndexSource, SizeDependent};
pub use render_loop::{LoopStats, RenderLoop};
pub use sample::Sample;
pub use samples::{CubeConfig, RotatingCube, VolumeConfig, VolumetricAnimation};
