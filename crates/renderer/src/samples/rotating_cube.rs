//! Rotating cube: one graphics queue, one fence signal per frame.

use std::time::Duration;

use glam::{Mat4, Vec3};
use tracing::{debug, info};

use lockstep_platform::InputEvent;
use lockstep_rhi::{
    Backend, Barrier, BindPoint, BufferDesc, BufferId, BufferUsage, CommandRecorder, CompareOp,
    ContextDesc, CullMode, DepthBufferId, DeviceContext, Extent2D, Format, GpuDevice,
    GraphicsPipelineDesc, IndexFormat, PipelineId, QueueKind, RecorderState, ResourceHandle,
    ResourceState, RhiError, RhiResult, RootParameter, RootSignatureDesc, RootSignatureId, ShaderLoader,
    ShaderVisibility, SwapChain, TraceExt, VertexFormat, VertexLayout,
};

use super::{DEPTH_CLEAR, PRESENT_INTERVAL, load_shader, signal_and_wait};
use crate::camera::{DEFAULT_FAR, DEFAULT_FOV_Y, DEFAULT_NEAR, OrbitCamera};
use crate::frame::{FrameIndexSource, SizeDependent};
use crate::sample::Sample;
use crate::ubo::{ColorVertex, CubeConstants};

const VERTEX_SHADER: &str = "cube.vert";
const PIXEL_SHADER: &str = "cube.frag";

/// Index list of the cube, 12 triangles with clockwise front faces.
pub const CUBE_INDICES: [u16; 36] = [
    0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 5, 0, 5, 4, 2, 6, 7, 2, 7, 3, 0, 4, 6, 0, 6, 2, 1,
    3, 7, 1, 7, 5,
];

/// The 8 corners of a unit cube at +-1, each colored by its position mapped
/// into `[0, 1]`.
pub fn cube_vertices() -> [ColorVertex; 8] {
    std::array::from_fn(|corner| {
        let bit = |shift: usize| ((corner >> shift) & 1) as f32;
        let color = Vec3::new(bit(2), bit(1), bit(0));
        ColorVertex {
            position: color * 2.0 - Vec3::ONE,
            color,
        }
    })
}

/// Settings of the rotating cube sample.
#[derive(Clone, Debug, PartialEq)]
pub struct CubeConfig {
    pub extent: Extent2D,
    pub buffer_count: u32,
    pub clear_color: [f32; 4],
    pub frame_index: FrameIndexSource,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            extent: Extent2D::new(1280, 720),
            buffer_count: 3,
            clear_color: [0.0, 0.2, 0.4, 1.0],
            frame_index: FrameIndexSource::SwapChain,
        }
    }
}

/// Everything that exists only between `on_init` and teardown.
struct CubeGpu<B: Backend> {
    // Field order is drop order: the context goes last.
    recorder: CommandRecorder<B>,
    root_signature: RootSignatureId,
    pipeline: PipelineId,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    constant_buffer: BufferId,
    depth: DepthBufferId,
    size: SizeDependent,
    frame_index: u32,
    context: DeviceContext<B>,
}

/// A colored cube spinning about the Y axis, one revolution every 2π seconds.
pub struct RotatingCube<B: Backend> {
    title: String,
    config: CubeConfig,
    backend: Option<B>,
    shaders: Box<dyn ShaderLoader>,
    camera: OrbitCamera,
    elapsed: Duration,
    gpu: Option<CubeGpu<B>>,
}

impl<B: Backend> RotatingCube<B> {
    pub fn new(backend: B, shaders: Box<dyn ShaderLoader>, config: CubeConfig) -> Self {
        let mut camera = OrbitCamera::new(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO);
        camera.set_projection(
            DEFAULT_FOV_Y,
            config.extent.aspect_ratio(),
            DEFAULT_NEAR,
            DEFAULT_FAR,
        );
        Self {
            title: "Rotating Cube".to_string(),
            config,
            backend: Some(backend),
            shaders,
            camera,
            elapsed: Duration::ZERO,
            gpu: None,
        }
    }

    /// Replace the window title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The device context, once initialized.
    pub fn context(&self) -> Option<&DeviceContext<B>> {
        self.gpu.as_ref().map(|gpu| &gpu.context)
    }

    /// Back buffer the next frame renders into.
    pub fn frame_index(&self) -> Option<u32> {
        self.gpu.as_ref().map(|gpu| gpu.frame_index)
    }

    pub fn size(&self) -> Option<SizeDependent> {
        self.gpu.as_ref().map(|gpu| gpu.size)
    }

    /// State of the graphics recorder, empty before init.
    pub fn recorder_states(&self) -> Vec<RecorderState> {
        self.gpu
            .iter()
            .map(|gpu| gpu.recorder.state())
            .collect()
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    /// Total animation time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Ids of the vertex, index and constant buffers.
    pub fn buffers(&self) -> Option<[BufferId; 3]> {
        self.gpu
            .as_ref()
            .map(|gpu| [gpu.vertex_buffer, gpu.index_buffer, gpu.constant_buffer])
    }

    /// World-view-projection for the current time and camera.
    pub fn world_view_projection(&self) -> Mat4 {
        let world = Mat4::from_rotation_y(self.elapsed.as_secs_f32());
        self.camera.view_projection() * world
    }

    fn gpu_mut(&mut self) -> RhiResult<&mut CubeGpu<B>> {
        self.gpu
            .as_mut()
            .ok_or_else(|| RhiError::InvalidState("rotating cube is not initialized".into()))
    }

    fn record_frame(gpu: &mut CubeGpu<B>, clear_color: [f32; 4]) -> RhiResult<()> {
        let index = gpu.frame_index;
        let to_target = Barrier::transition(
            ResourceHandle::BackBuffer(index),
            ResourceState::Present,
            ResourceState::RenderTarget,
        );

        let recorder = &mut gpu.recorder;
        recorder.reset(Some(gpu.pipeline))?;
        recorder.set_root_signature(BindPoint::Graphics, gpu.root_signature)?;
        recorder.set_root_constant_buffer(BindPoint::Graphics, 0, gpu.constant_buffer)?;
        recorder.set_viewport(gpu.size.viewport)?;
        recorder.set_scissor(gpu.size.scissor)?;

        recorder.resource_barrier(&[to_target])?;
        recorder.set_render_target(index, Some(gpu.depth))?;
        recorder.clear_render_target(index, clear_color)?;
        recorder.clear_depth(gpu.depth, DEPTH_CLEAR)?;
        recorder.set_vertex_buffer(gpu.vertex_buffer, size_of::<ColorVertex>() as u32)?;
        recorder.set_index_buffer(gpu.index_buffer, IndexFormat::Uint16)?;
        recorder.draw_indexed(CUBE_INDICES.len() as u32, 1)?;
        recorder.resource_barrier(&[to_target.reversed()])?;
        recorder.close()
    }
}

impl<B: Backend> Sample for RotatingCube<B> {
    fn title(&self) -> &str {
        &self.title
    }

    fn on_init(&mut self) -> RhiResult<()> {
        let backend = self
            .backend
            .take()
            .ok_or_else(|| RhiError::InvalidState("rotating cube initialized twice".into()))?;
        info!("Initializing {} on the {} backend", self.title, backend.name());

        let desc = ContextDesc::new(&self.title, self.config.extent, self.config.buffer_count);
        let context = backend.into_context(&desc).traced("Backend::into_context")?;
        let device = context.device();

        let root_signature = device
            .create_root_signature(&RootSignatureDesc {
                label: "cube".to_string(),
                parameters: vec![RootParameter::ConstantBuffer {
                    visibility: ShaderVisibility::All,
                }],
            })
            .traced("create_root_signature")?;

        let vertex_shader = load_shader(self.shaders.as_ref(), VERTEX_SHADER, "vs_5_0")?;
        let pixel_shader = load_shader(self.shaders.as_ref(), PIXEL_SHADER, "ps_5_0")?;
        let pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                label: "cube".to_string(),
                root_signature,
                vertex_shader: &vertex_shader,
                pixel_shader: &pixel_shader,
                vertex_layout: VertexLayout::packed(&[
                    VertexFormat::Float32x3,
                    VertexFormat::Float32x3,
                ]),
                color_format: context.swap_chain().format(),
                depth_format: Some(Format::D32Float),
                depth_compare: CompareOp::LessEqual,
                cull_mode: CullMode::Back,
            })
            .traced("create_graphics_pipeline")?;

        let vertices = cube_vertices();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = device
            .create_buffer(
                &BufferDesc::new("cube vertices", BufferUsage::Vertex, vertex_bytes.len() as u64),
                Some(vertex_bytes),
            )
            .traced("create_buffer")?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&CUBE_INDICES);
        let index_buffer = device
            .create_buffer(
                &BufferDesc::new("cube indices", BufferUsage::Index, index_bytes.len() as u64),
                Some(index_bytes),
            )
            .traced("create_buffer")?;

        let constants = CubeConstants::default();
        let constant_buffer = device
            .create_buffer(
                &BufferDesc::new(
                    "cube constants",
                    BufferUsage::Uniform,
                    size_of::<CubeConstants>() as u64,
                ),
                Some(bytemuck::bytes_of(&constants)),
            )
            .traced("create_buffer")?;

        let extent = context.swap_chain().extent();
        let depth = device
            .create_depth_buffer(extent, Format::D32Float)
            .traced("create_depth_buffer")?;
        let recorder = context
            .create_recorder(QueueKind::Graphics)
            .traced("create_recorder")?;

        let size = SizeDependent::from_extent(extent);
        self.camera.set_aspect(size.aspect_ratio);
        let frame_index = context.current_back_buffer_index();
        debug!("Cube ready: {}x{}, frame index {}", extent.width, extent.height, frame_index);

        self.gpu = Some(CubeGpu {
            recorder,
            root_signature,
            pipeline,
            vertex_buffer,
            index_buffer,
            constant_buffer,
            depth,
            size,
            frame_index,
            context,
        });
        Ok(())
    }

    fn on_size_changed(&mut self, requested: Extent2D) -> RhiResult<()> {
        let gpu = self.gpu_mut()?;
        signal_and_wait(&mut gpu.context, QueueKind::Graphics)?;

        gpu.context
            .device()
            .destroy_depth_buffer(gpu.depth)
            .traced("destroy_depth_buffer")?;
        gpu.context
            .resize_swap_chain(requested)
            .traced("SwapChain::resize")?;

        // The surface may settle on a different size than requested
        let extent = gpu.context.swap_chain().extent();
        gpu.depth = gpu
            .context
            .device()
            .create_depth_buffer(extent, Format::D32Float)
            .traced("create_depth_buffer")?;

        gpu.size = SizeDependent::from_extent(extent);
        gpu.frame_index = gpu.context.current_back_buffer_index();
        let aspect = gpu.size.aspect_ratio;
        self.camera.set_aspect(aspect);
        Ok(())
    }

    fn on_update(&mut self, delta: Duration) {
        self.elapsed += delta;
    }

    fn on_render(&mut self) -> RhiResult<()> {
        let wvp = self.world_view_projection();
        let clear_color = self.config.clear_color;
        let source = self.config.frame_index;
        let gpu = self.gpu_mut()?;

        // The previous frame's wait retired every reader of this buffer.
        let constants = CubeConstants { wvp };
        gpu.context
            .device()
            .write_buffer(gpu.constant_buffer, 0, bytemuck::bytes_of(&constants))
            .best_effort("write_buffer");

        Self::record_frame(gpu, clear_color).traced("RotatingCube::record_frame")?;
        gpu.context.execute(&mut gpu.recorder).best_effort("CommandQueue::execute");
        gpu.context.present(PRESENT_INTERVAL).best_effort("SwapChain::present");

        signal_and_wait(&mut gpu.context, QueueKind::Graphics)?;
        let buffer_count = gpu.context.swap_chain().buffer_count();
        gpu.frame_index = source.after_present(
            gpu.frame_index,
            buffer_count,
            gpu.context.current_back_buffer_index(),
        );
        Ok(())
    }

    fn on_destroy(&mut self) -> RhiResult<()> {
        match self.gpu.as_mut() {
            Some(gpu) => {
                signal_and_wait(&mut gpu.context, QueueKind::Graphics)?;
                info!("{} drained", self.title);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn on_event(&mut self, event: &InputEvent) -> bool {
        self.camera.handle_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_vertices_match_corners() {
        let vertices = cube_vertices();
        assert_eq!(vertices[0].position, Vec3::splat(-1.0));
        assert_eq!(vertices[0].color, Vec3::ZERO);
        assert_eq!(vertices[1].position, Vec3::new(-1.0, -1.0, 1.0));
        assert_eq!(vertices[1].color, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(vertices[6].position, Vec3::new(1.0, 1.0, -1.0));
        assert_eq!(vertices[7].color, Vec3::ONE);
    }

    #[test]
    fn test_cube_indices_cover_every_corner() {
        assert!(CUBE_INDICES.iter().all(|&i| i < 8));
        for corner in 0..8u16 {
            assert!(CUBE_INDICES.contains(&corner));
        }
    }

    #[test]
    fn test_default_config() {
        let config = CubeConfig::default();
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.clear_color, [0.0, 0.2, 0.4, 1.0]);
        assert_eq!(config.frame_index, FrameIndexSource::SwapChain);
    }
}
