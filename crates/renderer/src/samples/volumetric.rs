//! Volumetric animation: a compute queue animates a voxel volume that the
//! graphics queue ray-marches inside a bounding cube.
//!
//! ```text
//!   compute:  dispatch(volume / 8) -> signal(n)   --CPU wait(n)-->
//!   graphics: [Present->RT, UAV->SRV] draw [RT->Present, SRV->UAV]
//!             present -> signal(n+1) --CPU wait(n+1)-->
//! ```
//!
//! The volume buffer lives in UnorderedAccess between frames. The graphics
//! queue only reads it after the CPU observed the compute signal, and only
//! while it is in ShaderResource.

use std::time::Duration;

use glam::{IVec4, Vec3};
use tracing::{debug, info};

use lockstep_platform::InputEvent;
use lockstep_rhi::{
    Backend, Barrier, BindPoint, BufferDesc, BufferId, BufferUsage, CommandRecorder, CompareOp,
    ComputePipelineDesc, ContextDesc, CullMode, DepthBufferId, DescriptorHeapId, DescriptorKind,
    DescriptorTableId, DeviceContext, Extent2D, Format, GpuDevice, GraphicsPipelineDesc,
    IndexFormat, MemoryKind, PipelineId, QueueKind, RecorderState, ResourceHandle, ResourceState,
    ResourceView, RhiError, RhiResult, RootParameter, RootSignatureDesc, RootSignatureId, ShaderLoader,
    ShaderVisibility, SwapChain, TraceExt, VertexFormat, VertexLayout, align_constant_buffer_size,
    dispatch_grid,
};

use super::{DEPTH_CLEAR, PRESENT_INTERVAL, load_shader, signal_and_wait};
use crate::camera::{DEFAULT_FAR, DEFAULT_FOV_Y, DEFAULT_NEAR, OrbitCamera};
use crate::frame::{FrameIndexSource, SizeDependent};
use crate::sample::Sample;
use crate::ubo::{PositionVertex, SHELL_COLORS, VolumeConstants};

const VERTEX_SHADER: &str = "volume.vert";
const PIXEL_SHADER: &str = "volume.frag";
const COMPUTE_SHADER: &str = "volume.comp";

/// Threads per compute group on each axis. Must match `volume.comp`.
pub const THREAD_GROUP: [u32; 3] = [8, 8, 8];

/// Bytes per voxel (RGBA8).
pub const VOXEL_BYTES: u64 = 4;

/// Byte every voxel channel starts from before the shells are added.
const VOLUME_FILL: u8 = 64;

/// Size of the upload region backing the constant buffer.
const CONSTANT_BUFFER_BYTES: u64 = 64 * 1024;

/// Half the edge of the bounding cube, in world units.
const CUBE_HALF_EXTENT: f32 = 128.0;

// Root signature slots, shared by the graphics and compute layouts.
const SLOT_CONSTANTS: u32 = 0;
const SLOT_VOLUME_READ: u32 = 1;
const SLOT_VOLUME_WRITE: u32 = 2;

/// Index list of the bounding cube.
pub const VOLUME_INDICES: [u16; 36] = [
    0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 5, 0, 5, 4, 2, 6, 7, 2, 7, 3, 0, 4, 6, 0, 6, 2, 1,
    3, 7, 1, 7, 5,
];

/// Corners of the bounding cube at +-128.
pub fn volume_vertices() -> [PositionVertex; 8] {
    std::array::from_fn(|corner| {
        let sign = |shift: usize| if (corner >> shift) & 1 == 1 { 1.0 } else { -1.0 };
        PositionVertex {
            position: Vec3::new(sign(2), sign(1), sign(0)) * CUBE_HALF_EXTENT,
        }
    })
}

/// Initial voxel data: concentric shells of color around the volume center.
///
/// Every channel starts at 64. A voxel at distance `r` from the center falls
/// into shell `4 - floor(3r / R)`, where `R` is the center-to-corner
/// distance. The shell's color mask scales a brightness ramp that repeats
/// every third of `R`, and alpha holds the shell index.
pub fn generate_volume(dims: [u32; 3], shells: &[IVec4; SHELL_COLORS]) -> Vec<u8> {
    let [width, height, depth] = dims;
    let half = Vec3::new(width as f32, height as f32, depth as f32) / 2.0;
    let radius = half.length();
    let mut bytes =
        vec![VOLUME_FILL; (width as usize) * (height as usize) * (depth as usize) * VOXEL_BYTES as usize];

    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                let offset = Vec3::new(x as f32, y as f32, z as f32) - half;
                let scale = offset.length() * 3.0 / radius;
                let shell = (4.0 - scale.floor()).clamp(0.0, (SHELL_COLORS - 1) as f32) as usize;
                let ramp = ((192.0 * scale + 0.5) as u32 % 192 + 1) as i32;
                let color = shells[shell];

                let voxel = (x as usize
                    + y as usize * width as usize
                    + z as usize * (height as usize) * (width as usize))
                    * VOXEL_BYTES as usize;
                let texel = &mut bytes[voxel..voxel + VOXEL_BYTES as usize];
                texel[0] = texel[0].wrapping_add((ramp * color.x) as u8);
                texel[1] = texel[1].wrapping_add((ramp * color.y) as u8);
                texel[2] = texel[2].wrapping_add((ramp * color.z) as u8);
                texel[3] = color.w as u8;
            }
        }
    }
    bytes
}

/// Settings of the volumetric animation sample.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeConfig {
    pub extent: Extent2D,
    pub buffer_count: u32,
    /// Voxel dimensions. Each must be a multiple of [`THREAD_GROUP`].
    pub volume: [u32; 3],
    pub clear_color: [f32; 4],
    pub frame_index: FrameIndexSource,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            extent: Extent2D::new(1280, 720),
            buffer_count: 5,
            volume: [256, 256, 256],
            clear_color: [0.0, 0.0, 0.0, 0.0],
            frame_index: FrameIndexSource::SwapChain,
        }
    }
}

impl VolumeConfig {
    /// Size of the volume buffer in bytes.
    pub fn volume_bytes(&self) -> u64 {
        self.volume.iter().map(|&d| u64::from(d)).product::<u64>() * VOXEL_BYTES
    }
}

struct VolumeGpu<B: Backend> {
    // Field order is drop order: the context goes last.
    graphics: CommandRecorder<B>,
    compute: CommandRecorder<B>,
    graphics_root: RootSignatureId,
    compute_root: RootSignatureId,
    graphics_pipeline: PipelineId,
    compute_pipeline: PipelineId,
    heap: DescriptorHeapId,
    graphics_constants: DescriptorTableId,
    graphics_volume: DescriptorTableId,
    compute_constants: DescriptorTableId,
    compute_volume: DescriptorTableId,
    volume: BufferId,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    constant_buffer: BufferId,
    depth: DepthBufferId,
    size: SizeDependent,
    frame_index: u32,
    context: DeviceContext<B>,
}

/// Buffers created at init, with the staging copies that filled them.
struct Upload {
    buffer: BufferId,
    staging: BufferId,
}

/// Create a device-local buffer and record a copy from a staging buffer,
/// followed by the transition into `ready`.
fn upload<B: Backend>(
    context: &DeviceContext<B>,
    recorder: &mut CommandRecorder<B>,
    desc: BufferDesc,
    data: &[u8],
    ready: ResourceState,
) -> RhiResult<Upload> {
    let device = context.device();
    let desc = desc.with_memory(MemoryKind::DeviceLocal);
    let buffer = device.create_buffer(&desc, None).traced("create_buffer")?;
    let staging = device
        .create_buffer(
            &BufferDesc::new(
                format!("{} staging", desc.label),
                BufferUsage::Staging,
                data.len() as u64,
            ),
            Some(data),
        )
        .traced("create_buffer")?;

    recorder.copy_buffer(staging, buffer, data.len() as u64)?;
    recorder.resource_barrier(&[Barrier::transition(
        ResourceHandle::Buffer(buffer),
        desc.initial_state,
        ready,
    )])?;
    Ok(Upload { buffer, staging })
}

/// Compute-animated voxel volume, ray-marched by the graphics queue.
pub struct VolumetricAnimation<B: Backend> {
    title: String,
    config: VolumeConfig,
    grid: [u32; 3],
    backend: Option<B>,
    shaders: Box<dyn ShaderLoader>,
    camera: OrbitCamera,
    constants: VolumeConstants,
    gpu: Option<VolumeGpu<B>>,
}

impl<B: Backend> VolumetricAnimation<B> {
    /// # Errors
    ///
    /// Returns [`RhiError::ConfigError`] if a volume dimension is not a
    /// multiple of the compute thread group size.
    pub fn new(backend: B, shaders: Box<dyn ShaderLoader>, config: VolumeConfig) -> RhiResult<Self> {
        let grid = dispatch_grid(config.volume, THREAD_GROUP)?;
        let mut camera = OrbitCamera::new(Vec3::new(500.0, 500.0, -500.0), Vec3::ZERO);
        camera.set_projection(
            DEFAULT_FOV_Y,
            config.extent.aspect_ratio(),
            DEFAULT_NEAR,
            DEFAULT_FAR,
        );
        Ok(Self {
            title: "Volumetric Animation".to_string(),
            config,
            grid,
            backend: Some(backend),
            shaders,
            camera,
            constants: VolumeConstants::default(),
            gpu: None,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Thread groups per dispatch.
    pub fn grid(&self) -> [u32; 3] {
        self.grid
    }

    pub fn context(&self) -> Option<&DeviceContext<B>> {
        self.gpu.as_ref().map(|gpu| &gpu.context)
    }

    pub fn frame_index(&self) -> Option<u32> {
        self.gpu.as_ref().map(|gpu| gpu.frame_index)
    }

    pub fn size(&self) -> Option<SizeDependent> {
        self.gpu.as_ref().map(|gpu| gpu.size)
    }

    /// States of the compute and graphics recorders, empty before init.
    pub fn recorder_states(&self) -> Vec<RecorderState> {
        self.gpu
            .iter()
            .flat_map(|gpu| [gpu.compute.state(), gpu.graphics.state()])
            .collect()
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    /// The voxel buffer shared by both queues.
    pub fn volume_buffer(&self) -> Option<BufferId> {
        self.gpu.as_ref().map(|gpu| gpu.volume)
    }

    pub fn constant_buffer(&self) -> Option<BufferId> {
        self.gpu.as_ref().map(|gpu| gpu.constant_buffer)
    }

    fn gpu_mut(&mut self) -> RhiResult<&mut VolumeGpu<B>> {
        self.gpu
            .as_mut()
            .ok_or_else(|| RhiError::InvalidState("volumetric animation is not initialized".into()))
    }

    fn record_compute(gpu: &mut VolumeGpu<B>, grid: [u32; 3]) -> RhiResult<()> {
        let recorder = &mut gpu.compute;
        recorder.reset(Some(gpu.compute_pipeline))?;
        recorder.set_root_signature(BindPoint::Compute, gpu.compute_root)?;
        recorder.set_descriptor_heap(gpu.heap)?;
        recorder.set_descriptor_table(BindPoint::Compute, SLOT_CONSTANTS, gpu.compute_constants)?;
        recorder.set_descriptor_table(BindPoint::Compute, SLOT_VOLUME_WRITE, gpu.compute_volume)?;
        recorder.dispatch(grid)?;
        recorder.close()
    }

    fn record_graphics(gpu: &mut VolumeGpu<B>, clear_color: [f32; 4]) -> RhiResult<()> {
        let index = gpu.frame_index;
        let acquire = [
            Barrier::transition(
                ResourceHandle::BackBuffer(index),
                ResourceState::Present,
                ResourceState::RenderTarget,
            ),
            Barrier::transition(
                ResourceHandle::Buffer(gpu.volume),
                ResourceState::UnorderedAccess,
                ResourceState::ShaderResource,
            ),
        ];
        let release = acquire.map(Barrier::reversed);

        let recorder = &mut gpu.graphics;
        recorder.reset(Some(gpu.graphics_pipeline))?;
        recorder.set_root_signature(BindPoint::Graphics, gpu.graphics_root)?;
        recorder.set_descriptor_heap(gpu.heap)?;
        recorder.set_descriptor_table(BindPoint::Graphics, SLOT_CONSTANTS, gpu.graphics_constants)?;
        recorder.set_descriptor_table(BindPoint::Graphics, SLOT_VOLUME_READ, gpu.graphics_volume)?;
        recorder.set_viewport(gpu.size.viewport)?;
        recorder.set_scissor(gpu.size.scissor)?;

        recorder.resource_barrier(&acquire)?;
        recorder.set_render_target(index, Some(gpu.depth))?;
        recorder.clear_render_target(index, clear_color)?;
        recorder.clear_depth(gpu.depth, DEPTH_CLEAR)?;
        recorder.set_vertex_buffer(gpu.vertex_buffer, size_of::<PositionVertex>() as u32)?;
        recorder.set_index_buffer(gpu.index_buffer, IndexFormat::Uint16)?;
        recorder.draw_indexed(VOLUME_INDICES.len() as u32, 1)?;
        recorder.resource_barrier(&release)?;
        recorder.close()
    }
}

impl<B: Backend> Sample for VolumetricAnimation<B> {
    fn title(&self) -> &str {
        &self.title
    }

    fn on_init(&mut self) -> RhiResult<()> {
        let backend = self
            .backend
            .take()
            .ok_or_else(|| RhiError::InvalidState("volumetric animation initialized twice".into()))?;
        info!(
            "Initializing {} on the {} backend: {:?} voxels, {:?} groups",
            self.title,
            backend.name(),
            self.config.volume,
            self.grid
        );

        let desc = ContextDesc::new(&self.title, self.config.extent, self.config.buffer_count)
            .with_compute_queue();
        let mut context = backend.into_context(&desc).traced("Backend::into_context")?;

        let root_signature = |label: &str, read_visibility| RootSignatureDesc {
            label: label.to_string(),
            parameters: vec![
                RootParameter::DescriptorTable {
                    kind: DescriptorKind::ConstantBuffer,
                    visibility: ShaderVisibility::All,
                },
                RootParameter::DescriptorTable {
                    kind: DescriptorKind::ShaderResource,
                    visibility: read_visibility,
                },
                RootParameter::DescriptorTable {
                    kind: DescriptorKind::UnorderedAccess,
                    visibility: ShaderVisibility::All,
                },
            ],
        };
        let device = context.device();
        let graphics_root = device
            .create_root_signature(&root_signature("volume graphics", ShaderVisibility::Pixel))
            .traced("create_root_signature")?;
        let compute_root = device
            .create_root_signature(&root_signature("volume compute", ShaderVisibility::All))
            .traced("create_root_signature")?;

        let vertex_shader = load_shader(self.shaders.as_ref(), VERTEX_SHADER, "vs_5_0")?;
        let pixel_shader = load_shader(self.shaders.as_ref(), PIXEL_SHADER, "ps_5_0")?;
        let compute_shader = load_shader(self.shaders.as_ref(), COMPUTE_SHADER, "cs_5_0")?;

        let graphics_pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                label: "volume raymarch".to_string(),
                root_signature: graphics_root,
                vertex_shader: &vertex_shader,
                pixel_shader: &pixel_shader,
                vertex_layout: VertexLayout::packed(&[VertexFormat::Float32x3]),
                color_format: context.swap_chain().format(),
                depth_format: Some(Format::D32Float),
                depth_compare: CompareOp::LessEqual,
                cull_mode: CullMode::Back,
            })
            .traced("create_graphics_pipeline")?;
        let compute_pipeline = device
            .create_compute_pipeline(&ComputePipelineDesc {
                label: "volume animate".to_string(),
                root_signature: compute_root,
                shader: &compute_shader,
            })
            .traced("create_compute_pipeline")?;

        let mut graphics = context
            .create_recorder(QueueKind::Graphics)
            .traced("create_recorder")?;
        let compute = context
            .create_recorder(QueueKind::Compute)
            .traced("create_recorder")?;

        // Initial uploads, recorded on the graphics recorder.
        graphics.reset(None)?;
        let volume_bytes = self.config.volume_bytes();
        let voxels = generate_volume(self.config.volume, &self.constants.col_val);
        let volume = upload(
            &context,
            &mut graphics,
            BufferDesc::new("volume", BufferUsage::Storage, volume_bytes),
            &voxels,
            ResourceState::UnorderedAccess,
        )?;
        drop(voxels);

        let vertices = volume_vertices();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex = upload(
            &context,
            &mut graphics,
            BufferDesc::new("volume cube vertices", BufferUsage::Vertex, vertex_bytes.len() as u64),
            vertex_bytes,
            ResourceState::VertexAndConstantBuffer,
        )?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&VOLUME_INDICES);
        let index = upload(
            &context,
            &mut graphics,
            BufferDesc::new("volume cube indices", BufferUsage::Index, index_bytes.len() as u64),
            index_bytes,
            ResourceState::IndexBuffer,
        )?;

        let device = context.device();
        let constant_buffer = device
            .create_buffer(
                &BufferDesc::new("volume constants", BufferUsage::Uniform, CONSTANT_BUFFER_BYTES),
                Some(bytemuck::bytes_of(&self.constants)),
            )
            .traced("create_buffer")?;

        let heap = device.create_descriptor_heap(4).traced("create_descriptor_heap")?;
        let constants_view = ResourceView::ConstantBuffer {
            buffer: constant_buffer,
            size: align_constant_buffer_size(VolumeConstants::SIZE as u64),
        };
        let graphics_constants = device
            .create_descriptor_table(heap, graphics_root, SLOT_CONSTANTS, &constants_view)
            .traced("create_descriptor_table")?;
        let graphics_volume = device
            .create_descriptor_table(
                heap,
                graphics_root,
                SLOT_VOLUME_READ,
                &ResourceView::ShaderResource {
                    buffer: volume.buffer,
                    size: volume_bytes,
                },
            )
            .traced("create_descriptor_table")?;
        let compute_constants = device
            .create_descriptor_table(heap, compute_root, SLOT_CONSTANTS, &constants_view)
            .traced("create_descriptor_table")?;
        let compute_volume = device
            .create_descriptor_table(
                heap,
                compute_root,
                SLOT_VOLUME_WRITE,
                &ResourceView::UnorderedAccess {
                    buffer: volume.buffer,
                    size: volume_bytes,
                },
            )
            .traced("create_descriptor_table")?;

        let transitions = graphics.close_with_transitions().traced("CommandRecorder::close")?;
        debug!("Initial upload leaves {} resources in new states", transitions.len());
        context.execute(&mut graphics).traced("CommandQueue::execute")?;
        signal_and_wait(&mut context, QueueKind::Graphics)?;

        for staging in [volume.staging, vertex.staging, index.staging] {
            context.device().destroy_buffer(staging).traced("destroy_buffer")?;
        }

        let extent = context.swap_chain().extent();
        let depth = context
            .device()
            .create_depth_buffer(extent, Format::D32Float)
            .traced("create_depth_buffer")?;
        let size = SizeDependent::from_extent(extent);
        self.camera.set_aspect(size.aspect_ratio);
        let frame_index = context.current_back_buffer_index();

        self.gpu = Some(VolumeGpu {
            graphics,
            compute,
            graphics_root,
            compute_root,
            graphics_pipeline,
            compute_pipeline,
            heap,
            graphics_constants,
            graphics_volume,
            compute_constants,
            compute_volume,
            volume: volume.buffer,
            vertex_buffer: vertex.buffer,
            index_buffer: index.buffer,
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

    fn on_update(&mut self, _delta: Duration) {
        self.constants.wvp = self.camera.view_projection();
        self.constants.view_pos = self.camera.eye().extend(1.0);
    }

    fn on_render(&mut self) -> RhiResult<()> {
        let grid = self.grid;
        let clear_color = self.config.clear_color;
        let source = self.config.frame_index;
        let constants = self.constants;
        let gpu = self.gpu_mut()?;

        Self::record_compute(gpu, grid).traced("VolumetricAnimation::record_compute")?;
        gpu.context.execute(&mut gpu.compute).best_effort("CommandQueue::execute");
        signal_and_wait(&mut gpu.context, QueueKind::Compute)?;

        // Both queues are idle here, so nothing reads the constants.
        gpu.context
            .device()
            .write_buffer(gpu.constant_buffer, 0, bytemuck::bytes_of(&constants))
            .best_effort("write_buffer");

        Self::record_graphics(gpu, clear_color).traced("VolumetricAnimation::record_graphics")?;
        gpu.context.execute(&mut gpu.graphics).best_effort("CommandQueue::execute");
        gpu.context.present(PRESENT_INTERVAL).best_effort("SwapChain::present");
        let buffer_count = gpu.context.swap_chain().buffer_count();
        gpu.frame_index = source.after_present(
            gpu.frame_index,
            buffer_count,
            gpu.context.current_back_buffer_index(),
        );

        signal_and_wait(&mut gpu.context, QueueKind::Graphics)?;
        Ok(())
    }

    fn on_destroy(&mut self) -> RhiResult<()> {
        match self.gpu.as_mut() {
            Some(gpu) => {
                signal_and_wait(&mut gpu.context, QueueKind::Compute)?;
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
