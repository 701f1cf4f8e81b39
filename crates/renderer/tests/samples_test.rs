//! Both samples driven end to end on the headless backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lockstep_platform::{FrameControl, InputEvent};
use lockstep_renderer::samples::{CUBE_INDICES, generate_volume};
use lockstep_renderer::ubo::VolumeConstants;
use lockstep_renderer::{
    CubeConfig, FrameIndexSource, RenderLoop, RotatingCube, Sample, SizeDependent, VolumeConfig,
    VolumetricAnimation,
};
use lockstep_rhi::headless::{GpuEvent, HeadlessBackend, HeadlessConfig, HeadlessProbe};
use lockstep_rhi::shader::SPIRV_MAGIC;
use lockstep_rhi::{
    Extent2D, QueueKind, RecorderState, ResourceHandle, ResourceState, RhiError, RhiResult, ShaderBytecode,
    ShaderLoader, ShaderStage, SwapChain,
};

const FRAME: Duration = Duration::from_millis(16);

/// Hands out a one-word module for any source.
struct StubShaders;

impl ShaderLoader for StubShaders {
    fn compile(&self, _source: &Path, entry_point: &str, profile: &str) -> RhiResult<ShaderBytecode> {
        Ok(ShaderBytecode {
            stage: ShaderStage::from_profile(profile)?,
            entry_point: entry_point.to_string(),
            code: vec![SPIRV_MAGIC],
        })
    }
}

struct MissingShaders;

impl ShaderLoader for MissingShaders {
    fn compile(&self, source: &Path, _entry_point: &str, _profile: &str) -> RhiResult<ShaderBytecode> {
        Err(RhiError::ShaderError(format!("{source:?} was never compiled")))
    }
}

fn cube(config: HeadlessConfig, cube: CubeConfig) -> (RotatingCube<HeadlessBackend>, HeadlessProbe) {
    let backend = HeadlessBackend::new(config);
    let probe = backend.probe();
    (RotatingCube::new(backend, Box::new(StubShaders), cube), probe)
}

fn small_volume() -> VolumeConfig {
    VolumeConfig {
        extent: Extent2D::new(320, 240),
        volume: [16, 16, 16],
        ..Default::default()
    }
}

fn volumetric(
    config: HeadlessConfig,
    volume: VolumeConfig,
) -> (VolumetricAnimation<HeadlessBackend>, HeadlessProbe) {
    let backend = HeadlessBackend::new(config);
    let probe = backend.probe();
    let sample = VolumetricAnimation::new(backend, Box::new(StubShaders), volume).unwrap();
    (sample, probe)
}

fn run_frames<S: Sample>(sample: &mut S, frames: usize) {
    for _ in 0..frames {
        sample.on_update(FRAME);
        sample.on_render().unwrap();
    }
}

fn assert_clean(probe: &HeadlessProbe) {
    assert_eq!(probe.violations(), Vec::<String>::new());
    assert_eq!(probe.hazards(), Vec::<String>::new());
}

fn drawn_back_buffers(probe: &HeadlessProbe) -> Vec<u32> {
    probe
        .journal()
        .into_iter()
        .filter_map(|event| match event {
            GpuEvent::Draw { back_buffer, .. } => back_buffer,
            _ => None,
        })
        .collect()
}

/// Asks the loop to stop while the given frame is being updated.
struct StopDuringFrame<S> {
    inner: S,
    control: Arc<FrameControl>,
    frame: u64,
    stop_at: u64,
}

impl<S: Sample> StopDuringFrame<S> {
    fn new(inner: S, control: Arc<FrameControl>, stop_at: u64) -> Self {
        Self {
            inner,
            control,
            frame: 0,
            stop_at,
        }
    }
}

impl<S: Sample> Sample for StopDuringFrame<S> {
    fn title(&self) -> &str {
        self.inner.title()
    }

    fn on_init(&mut self) -> RhiResult<()> {
        self.inner.on_init()
    }

    fn on_size_changed(&mut self, extent: Extent2D) -> RhiResult<()> {
        self.inner.on_size_changed(extent)
    }

    fn on_update(&mut self, delta: Duration) {
        self.frame += 1;
        if self.frame == self.stop_at {
            self.control.request_stop();
        }
        self.inner.on_update(delta);
    }

    fn on_render(&mut self) -> RhiResult<()> {
        self.inner.on_render()
    }

    fn on_destroy(&mut self) -> RhiResult<()> {
        self.inner.on_destroy()
    }
}

fn assert_back_buffers_present(probe: &HeadlessProbe, count: u32) {
    for index in 0..count {
        assert_eq!(
            probe.resource_state(ResourceHandle::BackBuffer(index)),
            Some(ResourceState::Present),
            "back buffer {index}"
        );
    }
}

#[test]
fn test_cube_frame_index_after_init_is_reported_index() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();

    let context = sample.context().unwrap();
    assert_eq!(sample.frame_index(), Some(0));
    assert_eq!(sample.frame_index(), Some(context.current_back_buffer_index()));
    assert_eq!(context.swap_chain().buffer_count(), 3);
    assert_eq!(context.fence().issued(), 0);
    assert!(probe.journal().is_empty());
}

#[test]
fn test_cube_signals_once_per_frame() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();

    for frame in 1..=5u64 {
        run_frames(&mut sample, 1);
        let fence = sample.context().unwrap().fence();
        assert_eq!(fence.issued(), frame);
        assert_eq!(fence.completed(), frame);
    }

    let signals = probe.signals();
    assert_eq!(signals.len(), 5);
    assert!(signals.iter().all(|&(queue, _)| queue == QueueKind::Graphics));
    assert_eq!(
        signals.iter().map(|&(_, value)| value).collect::<Vec<_>>(),
        [1, 2, 3, 4, 5]
    );
    assert_clean(&probe);
}

#[test]
fn test_cube_restores_back_buffers_and_draws_every_frame() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 4);

    assert_back_buffers_present(&probe, 3);
    assert_eq!(probe.presented(), [0, 1, 2, 0]);
    assert_eq!(drawn_back_buffers(&probe), [0, 1, 2, 0]);
    assert!(probe.journal().iter().all(|event| match event {
        GpuEvent::Draw { index_count, .. } => *index_count == CUBE_INDICES.len() as u32,
        _ => true,
    }));
    assert_eq!(sample.frame_index(), Some(1));
    assert_clean(&probe);
}

#[test]
fn test_cube_writes_rotation_into_constants() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 3);

    assert_eq!(sample.elapsed(), FRAME * 3);
    let [_, _, constants] = sample.buffers().unwrap();
    let bytes = probe.buffer_contents(constants).unwrap();
    let expected = sample.world_view_projection();
    assert_eq!(bytes, bytemuck::bytes_of(&expected));
}

#[test]
fn test_reported_index_tracks_out_of_order_presents() {
    let config = HeadlessConfig::default().with_present_order(vec![0, 2, 1]);
    let (mut sample, probe) = cube(config, CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 4);

    assert_eq!(probe.presented(), [0, 2, 1, 0]);
    assert_eq!(drawn_back_buffers(&probe), probe.presented());
    assert_clean(&probe);
}

#[test]
fn test_round_robin_drifts_from_out_of_order_presents() {
    let config = HeadlessConfig::default().with_present_order(vec![0, 2, 1]);
    let cube_config = CubeConfig {
        frame_index: FrameIndexSource::RoundRobin,
        ..Default::default()
    };
    let (mut sample, probe) = cube(config, cube_config);
    sample.on_init().unwrap();
    run_frames(&mut sample, 4);

    assert_eq!(drawn_back_buffers(&probe), [0, 1, 2, 0]);
    assert_ne!(drawn_back_buffers(&probe), probe.presented());
}

#[test]
fn test_resize_to_current_size_is_idempotent() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 2);

    let before = sample.size().unwrap();
    sample.on_size_changed(before.extent).unwrap();
    assert_eq!(sample.size().unwrap(), before);
    sample.on_size_changed(before.extent).unwrap();
    assert_eq!(sample.size().unwrap(), before);

    run_frames(&mut sample, 2);
    assert_clean(&probe);
}

#[test]
fn test_resize_rebuilds_size_dependent_state() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 2);

    let extent = Extent2D::new(800, 600);
    sample.on_size_changed(extent).unwrap();

    assert_eq!(sample.size().unwrap(), SizeDependent::from_extent(extent));
    assert!((sample.camera().aspect() - 800.0 / 600.0).abs() < 1e-6);
    let context = sample.context().unwrap();
    assert_eq!(context.swap_chain().extent(), extent);
    assert_eq!(sample.frame_index(), Some(context.current_back_buffer_index()));
    assert!(probe.journal().contains(&GpuEvent::Resized {
        extent,
        buffer_count: 3,
    }));

    run_frames(&mut sample, 3);
    assert_back_buffers_present(&probe, 3);
    assert_clean(&probe);
}

#[test]
fn test_cube_resize_follows_swap_chain_extent() {
    let surface = Extent2D::new(800, 600);
    let config = HeadlessConfig::default().with_surface_extent(surface);
    let (mut sample, probe) = cube(config, CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 1);

    sample.on_size_changed(Extent2D::new(801, 600)).unwrap();

    assert_eq!(sample.context().unwrap().swap_chain().extent(), surface);
    assert_eq!(sample.size().unwrap(), SizeDependent::from_extent(surface));
    assert_eq!(probe.live_depth_extents(), [surface]);
    assert!((sample.camera().aspect() - 800.0 / 600.0).abs() < 1e-6);

    run_frames(&mut sample, 2);
    assert_clean(&probe);
}

#[test]
fn test_cube_recorder_closed_after_stop_during_frame() {
    let (sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    let control = Arc::new(FrameControl::new());
    let mut wrapped = StopDuringFrame::new(sample, control.clone(), 2);

    let stats = RenderLoop::new(control).run(&mut wrapped, |_| {}).unwrap();

    assert_eq!(stats.frames, 2);
    assert_eq!(wrapped.inner.recorder_states(), [RecorderState::Closed]);
    assert!(!probe.has_pending_work());
    assert_clean(&probe);
}

#[test]
fn test_drag_orbits_the_camera() {
    let (mut sample, _probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    let eye = sample.camera().eye();

    assert!(!sample.on_event(&InputEvent::MouseDown(lockstep_platform::MouseButton::Left)));
    assert!(!sample.on_event(&InputEvent::MouseMove { x: 10.0, y: 10.0 }));
    assert!(sample.on_event(&InputEvent::MouseMove { x: 60.0, y: 10.0 }));

    let moved = sample.camera().eye();
    assert!((moved - eye).length() > 1e-3);
    assert!((moved.length() - eye.length()).abs() < 1e-3);
}

#[test]
fn test_render_loop_stops_between_frames_and_drains() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    let control = Arc::new(FrameControl::new());

    let stats = RenderLoop::new(control.clone())
        .with_frame_limit(3)
        .run(&mut sample, |_| {})
        .unwrap();

    assert_eq!(stats.frames, 3);
    assert!(control.is_stopped());
    assert!(!control.has_error());
    assert!(!probe.has_pending_work());

    // Three frame signals plus the final drain.
    let fence = sample.context().unwrap().fence();
    assert_eq!(fence.issued(), 4);
    assert_eq!(fence.completed(), 4);
    assert_clean(&probe);
}

#[test]
fn test_render_loop_applies_pending_resize() {
    let (mut sample, probe) = cube(HeadlessConfig::default(), CubeConfig::default());
    let control = Arc::new(FrameControl::new());
    control.request_resize(640, 360);

    RenderLoop::new(control)
        .with_frame_limit(2)
        .run(&mut sample, |_| {})
        .unwrap();

    assert_eq!(sample.size().unwrap().extent, Extent2D::new(640, 360));
    assert_clean(&probe);
}

#[test]
fn test_missing_shader_aborts_init() {
    let backend = HeadlessBackend::default();
    let mut sample = RotatingCube::new(backend, Box::new(MissingShaders), CubeConfig::default());
    let control = Arc::new(FrameControl::new());

    let result = RenderLoop::new(control.clone()).run(&mut sample, |_| {});

    assert!(matches!(result, Err(RhiError::ShaderError(_))));
    assert!(control.has_error());
    assert!(sample.context().is_none());
}

#[test]
fn test_threaded_timeline_runs_cube() {
    let config = HeadlessConfig::default().threaded(Duration::from_millis(1));
    let (mut sample, probe) = cube(config, CubeConfig::default());
    sample.on_init().unwrap();
    run_frames(&mut sample, 3);
    sample.on_destroy().unwrap();

    assert_eq!(probe.presented(), [0, 1, 2]);
    assert!(!probe.has_pending_work());
    assert_clean(&probe);
}

#[test]
fn test_volumetric_init_uploads_volume_and_releases_staging() {
    let config = small_volume();
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), config.clone());
    sample.on_init().unwrap();

    // The initial upload is one graphics signal.
    assert_eq!(probe.signals(), [(QueueKind::Graphics, 1)]);
    assert_eq!(sample.frame_index(), Some(0));

    let volume = sample.volume_buffer().unwrap();
    let expected = generate_volume(config.volume, &VolumeConstants::default().col_val);
    assert_eq!(probe.buffer_contents(volume), Some(expected));
    assert_eq!(
        probe.resource_state(ResourceHandle::Buffer(volume)),
        Some(ResourceState::UnorderedAccess)
    );

    let staging: Vec<_> = probe
        .buffers()
        .into_iter()
        .filter(|(_, label)| label.ends_with("staging"))
        .collect();
    assert_eq!(staging.len(), 3);
    for (buffer, label) in staging {
        assert_eq!(probe.buffer_contents(buffer), None, "{label} still alive");
    }
    assert_clean(&probe);
}

#[test]
fn test_volumetric_signals_compute_then_graphics() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 3);

    let fence = sample.context().unwrap().fence();
    assert_eq!(fence.issued(), 1 + 2 * 3);
    assert_eq!(fence.completed(), fence.issued());
    assert_eq!(
        probe.signals(),
        [
            (QueueKind::Graphics, 1),
            (QueueKind::Compute, 2),
            (QueueKind::Graphics, 3),
            (QueueKind::Compute, 4),
            (QueueKind::Graphics, 5),
            (QueueKind::Compute, 6),
            (QueueKind::Graphics, 7),
        ]
    );
    assert_clean(&probe);
}

#[test]
fn test_volumetric_restores_resource_states() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 6);

    let volume = sample.volume_buffer().unwrap();
    assert_eq!(
        probe.resource_state(ResourceHandle::Buffer(volume)),
        Some(ResourceState::UnorderedAccess)
    );
    assert_back_buffers_present(&probe, 5);
    assert_eq!(probe.presented(), [0, 1, 2, 3, 4, 0]);
    assert_clean(&probe);
}

#[test]
fn test_volumetric_dispatches_volume_over_eight() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 2);

    let dispatches: Vec<_> = probe
        .journal()
        .into_iter()
        .filter_map(|event| match event {
            GpuEvent::Dispatch { groups } => Some(groups),
            _ => None,
        })
        .collect();
    assert_eq!(dispatches, [[2, 2, 2], [2, 2, 2]]);
}

#[test]
fn test_volumetric_constants_follow_camera() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 1);

    let bytes = probe.buffer_contents(sample.constant_buffer().unwrap()).unwrap();
    let constants: VolumeConstants =
        bytemuck::pod_read_unaligned(&bytes[..VolumeConstants::SIZE]);
    assert_eq!(constants.wvp, sample.camera().view_projection());
    assert_eq!(constants.view_pos, sample.camera().eye().extend(1.0));
    assert_eq!(constants.bg_col, VolumeConstants::default().bg_col);
}

#[test]
fn test_volumetric_resize_then_render() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 2);

    let extent = Extent2D::new(1024, 768);
    sample.on_size_changed(extent).unwrap();
    assert_eq!(sample.size().unwrap(), SizeDependent::from_extent(extent));
    run_frames(&mut sample, 2);

    assert_back_buffers_present(&probe, 5);
    assert_clean(&probe);
}

#[test]
fn test_volumetric_resize_follows_swap_chain_extent() {
    let surface = Extent2D::new(800, 600);
    let config = HeadlessConfig::default().with_surface_extent(surface);
    let (mut sample, probe) = volumetric(config, small_volume());
    sample.on_init().unwrap();
    run_frames(&mut sample, 1);

    sample.on_size_changed(Extent2D::new(801, 600)).unwrap();

    assert_eq!(sample.context().unwrap().swap_chain().extent(), surface);
    assert_eq!(sample.size().unwrap(), SizeDependent::from_extent(surface));
    assert_eq!(probe.live_depth_extents(), [surface]);
    assert!((sample.camera().aspect() - 800.0 / 600.0).abs() < 1e-6);

    run_frames(&mut sample, 2);
    assert_clean(&probe);
}

#[test]
fn test_volumetric_recorders_closed_after_stop_during_frame() {
    let (sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    let control = Arc::new(FrameControl::new());
    let mut wrapped = StopDuringFrame::new(sample, control.clone(), 3);

    let stats = RenderLoop::new(control).run(&mut wrapped, |_| {}).unwrap();

    assert_eq!(stats.frames, 3);
    assert_eq!(
        wrapped.inner.recorder_states(),
        [RecorderState::Closed, RecorderState::Closed]
    );
    assert!(!probe.has_pending_work());
    assert_clean(&probe);
}

#[test]
fn test_volumetric_render_loop_drains_both_queues() {
    let (mut sample, probe) = volumetric(HeadlessConfig::default(), small_volume());
    let control = Arc::new(FrameControl::new());

    let stats = RenderLoop::new(control)
        .with_frame_limit(2)
        .run(&mut sample, |_| {})
        .unwrap();

    assert_eq!(stats.frames, 2);
    assert!(!probe.has_pending_work());
    // Init, two signals per frame, and one per queue on teardown.
    assert_eq!(sample.context().unwrap().fence().issued(), 1 + 2 * 2 + 2);
    assert_clean(&probe);
}

#[test]
fn test_volume_dimensions_must_divide_by_eight() {
    let config = VolumeConfig {
        volume: [256, 256, 100],
        ..Default::default()
    };
    let result = VolumetricAnimation::new(HeadlessBackend::default(), Box::new(StubShaders), config);
    assert!(matches!(result, Err(RhiError::ConfigError(_))));

    let sample = VolumetricAnimation::new(
        HeadlessBackend::default(),
        Box::new(StubShaders),
        VolumeConfig::default(),
    )
    .unwrap();
    assert_eq!(sample.grid(), [32, 32, 32]);
}
