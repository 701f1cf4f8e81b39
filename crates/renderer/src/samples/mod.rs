//! The two samples: a rotating cube on one queue, and a volumetric animation
//! that pairs a compute queue with the graphics queue.
//!
//! Both follow the same frame protocol: record, submit, present, signal, then
//! block on the fence before anything the GPU used is touched again. At most
//! one frame is ever in flight, so the per-frame constant buffer is written in
//! place without double buffering.

mod rotating_cube;
mod volumetric;

pub use rotating_cube::{CUBE_INDICES, CubeConfig, RotatingCube, cube_vertices};
pub use volumetric::{
    VOLUME_INDICES, VolumeConfig, VolumetricAnimation, generate_volume, volume_vertices,
};

use std::path::Path;

use lockstep_rhi::{
    Backend, DeviceContext, QueueKind, RhiResult, ShaderBytecode, ShaderLoader, TraceExt,
};

/// Sync interval for every present: immediate, without waiting for vblank.
pub const PRESENT_INTERVAL: u32 = 0;

/// Depth value the depth buffer is cleared to each frame.
pub const DEPTH_CLEAR: f32 = 1.0;

/// Entry point every sample shader exports.
pub const SHADER_ENTRY_POINT: &str = "main";

pub(crate) fn load_shader(
    loader: &dyn ShaderLoader,
    source: &str,
    profile: &str,
) -> RhiResult<ShaderBytecode> {
    loader
        .compile(Path::new(source), SHADER_ENTRY_POINT, profile)
        .traced("ShaderLoader::compile")
}

/// Signal `queue` and block until the GPU reaches the ticket.
///
/// Failing to signal or wait is fatal for the frame loop.
pub(crate) fn signal_and_wait<B: Backend>(
    context: &mut DeviceContext<B>,
    queue: QueueKind,
) -> RhiResult<u64> {
    let ticket = context.signal(queue).traced("CommandQueue::signal")?;
    context.wait(ticket).traced("Fence::wait")?;
    Ok(ticket.value())
}
