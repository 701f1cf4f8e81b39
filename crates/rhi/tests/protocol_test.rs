//! Integration tests for the recorder/fence/queue protocol on the headless backend.

use std::time::Duration;

use lockstep_rhi::headless::{GpuEvent, HeadlessBackend, HeadlessConfig};
use lockstep_rhi::{
    Backend, Barrier, BindPoint, BufferDesc, BufferUsage, ComputePipelineDesc, ContextDesc,
    DescriptorKind, DeviceContext, Extent2D, Format, GpuDevice, GraphicsPipelineDesc, QueueKind,
    RecorderState, ResourceHandle, ResourceState, ResourceView, RhiError, RootParameter,
    RootSignatureDesc, ShaderBytecode, ShaderStage, ShaderVisibility, Ticket, VertexLayout,
};

fn context(config: HeadlessConfig, compute: bool) -> DeviceContext<HeadlessBackend> {
    let mut desc = ContextDesc::new("protocol", Extent2D::new(64, 64), 3);
    if compute {
        desc = desc.with_compute_queue();
    }
    HeadlessBackend::new(config)
        .into_context(&desc)
        .expect("headless context")
}

fn shader(stage: ShaderStage) -> ShaderBytecode {
    ShaderBytecode {
        stage,
        entry_point: "main".to_string(),
        code: vec![0x0723_0203],
    }
}

fn back_buffer_barriers(index: u32) -> (Barrier, Barrier) {
    let to_rt = Barrier::transition(
        ResourceHandle::BackBuffer(index),
        ResourceState::Present,
        ResourceState::RenderTarget,
    );
    (to_rt, to_rt.reversed())
}

#[test]
fn test_recorder_state_machine() {
    let ctx = context(HeadlessConfig::default(), false);
    let mut recorder = ctx.create_recorder(QueueKind::Graphics).unwrap();
    assert_eq!(recorder.state(), RecorderState::Closed);

    // Recording on a closed recorder is refused
    assert!(matches!(
        recorder.clear_render_target(0, [0.0; 4]),
        Err(RhiError::InvalidState(_))
    ));

    recorder.reset(None).unwrap();
    assert!(recorder.is_recording());
    assert!(matches!(recorder.reset(None), Err(RhiError::InvalidState(_))));

    recorder.close().unwrap();
    assert_eq!(recorder.state(), RecorderState::Closed);
    assert!(matches!(recorder.close(), Err(RhiError::InvalidState(_))));
}

#[test]
fn test_reset_is_busy_until_fence_observed() {
    let mut ctx = context(HeadlessConfig::default(), false);
    let mut recorder = ctx.create_recorder(QueueKind::Graphics).unwrap();
    let (to_rt, to_present) = back_buffer_barriers(0);

    recorder.reset(None).unwrap();
    recorder.resource_barrier(&[to_rt]).unwrap();
    recorder.clear_render_target(0, [0.0, 0.2, 0.4, 1.0]).unwrap();
    recorder.resource_barrier(&[to_present]).unwrap();
    recorder.close().unwrap();
    ctx.execute(&mut recorder).unwrap();

    // Submitted but no signal queued behind it yet
    assert!(matches!(
        recorder.reset(None),
        Err(RhiError::ResourceBusy {
            queue: QueueKind::Graphics,
            ..
        })
    ));

    let ticket = ctx.signal(QueueKind::Graphics).unwrap();
    assert_eq!(ticket, Ticket(1));
    match recorder.reset(None) {
        Err(RhiError::ResourceBusy {
            pending, completed, ..
        }) => {
            assert_eq!(pending, 1);
            assert_eq!(completed, 0);
        }
        other => panic!("expected ResourceBusy, got {other:?}"),
    }

    ctx.wait(ticket).unwrap();
    recorder.reset(None).unwrap();
    recorder.close().unwrap();
}

#[test]
fn test_unbalanced_recording_cannot_execute() {
    let mut ctx = context(HeadlessConfig::default(), false);
    let mut recorder = ctx.create_recorder(QueueKind::Graphics).unwrap();
    let (to_rt, _) = back_buffer_barriers(1);

    recorder.reset(None).unwrap();
    recorder.resource_barrier(&[to_rt]).unwrap();
    assert!(matches!(recorder.close(), Err(RhiError::UnbalancedBarriers(1))));
    assert_eq!(recorder.state(), RecorderState::Closed);
    assert!(matches!(ctx.execute(&mut recorder), Err(RhiError::InvalidState(_))));
}

#[test]
fn test_barrier_before_state_must_match_recording() {
    let ctx = context(HeadlessConfig::default(), false);
    let mut recorder = ctx.create_recorder(QueueKind::Graphics).unwrap();
    let (to_rt, _) = back_buffer_barriers(0);

    recorder.reset(None).unwrap();
    recorder.resource_barrier(&[to_rt]).unwrap();
    let err = recorder.resource_barrier(&[to_rt]).unwrap_err();
    assert!(matches!(
        err,
        RhiError::BarrierMismatch {
            actual: ResourceState::RenderTarget,
            ..
        }
    ));
}

#[test]
fn test_tickets_are_shared_across_queues() {
    let mut ctx = context(HeadlessConfig::default(), true);
    let compute = ctx.signal(QueueKind::Compute).unwrap();
    let graphics = ctx.signal(QueueKind::Graphics).unwrap();
    assert!(graphics > compute);

    ctx.wait(graphics).unwrap();
    assert_eq!(ctx.fence().completed(), graphics.value());
    assert_eq!(ctx.fence().issued(), 2);
}

#[test]
fn test_wait_without_pending_signal_is_deadlock() {
    let ctx = context(HeadlessConfig::default(), false);
    assert!(matches!(
        ctx.wait(Ticket(4)),
        Err(RhiError::Deadlock { value: 4, .. })
    ));
}

#[test]
fn test_compute_recorder_requires_compute_queue() {
    let ctx = context(HeadlessConfig::default(), false);
    assert!(matches!(
        ctx.create_recorder(QueueKind::Compute),
        Err(RhiError::InvalidState(_))
    ));
}

#[test]
fn test_signal_on_missing_queue_keeps_ticket() {
    let mut ctx = context(HeadlessConfig::default(), false);
    assert!(matches!(
        ctx.signal(QueueKind::Compute),
        Err(RhiError::InvalidState(_))
    ));
    assert_eq!(ctx.fence().issued(), 0);

    let ticket = ctx.signal(QueueKind::Graphics).unwrap();
    assert_eq!(ticket, Ticket(1));
    ctx.wait(ticket).unwrap();
}

#[test]
fn test_graphics_commands_refused_on_compute_recorder() {
    let ctx = context(HeadlessConfig::default(), true);
    let mut recorder = ctx.create_recorder(QueueKind::Compute).unwrap();
    recorder.reset(None).unwrap();
    assert!(matches!(
        recorder.draw_indexed(3, 1),
        Err(RhiError::InvalidState(_))
    ));
    recorder.dispatch([1, 1, 1]).unwrap();
}

#[test]
fn test_present_order_is_not_assumed() {
    let config = HeadlessConfig::default().with_present_order(vec![2, 0, 1]);
    let backend = HeadlessBackend::new(config);
    let probe = backend.probe();
    let mut ctx = backend
        .into_context(&ContextDesc::new("order", Extent2D::new(32, 32), 3))
        .unwrap();

    assert_eq!(ctx.current_back_buffer_index(), 2);
    ctx.present(0).unwrap();
    assert_eq!(ctx.current_back_buffer_index(), 0);
    ctx.present(0).unwrap();
    assert_eq!(ctx.current_back_buffer_index(), 1);

    ctx.flush(QueueKind::Graphics).unwrap();
    assert_eq!(probe.presented(), vec![2, 0]);
}

#[test]
fn test_upload_copy_moves_bytes() {
    let backend = HeadlessBackend::default();
    let probe = backend.probe();
    let mut ctx = backend
        .into_context(&ContextDesc::new("copy", Extent2D::new(32, 32), 2))
        .unwrap();

    let data: Vec<u8> = (0..64).collect();
    let staging = ctx
        .device()
        .create_buffer(&BufferDesc::new("staging", BufferUsage::Staging, 64), Some(&data))
        .unwrap();
    let target = ctx
        .device()
        .create_buffer(&BufferDesc::new("target", BufferUsage::Storage, 64), None)
        .unwrap();

    let mut recorder = ctx.create_recorder(QueueKind::Graphics).unwrap();
    recorder.reset(None).unwrap();
    recorder.copy_buffer(staging, target, 64).unwrap();
    recorder
        .resource_barrier(&[Barrier::transition(
            ResourceHandle::Buffer(target),
            ResourceState::CopyDest,
            ResourceState::ShaderResource,
        )])
        .unwrap();
    let changes = recorder.close_with_transitions().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to, ResourceState::ShaderResource);

    ctx.execute(&mut recorder).unwrap();
    ctx.flush(QueueKind::Graphics).unwrap();

    assert_eq!(probe.buffer_contents(target), Some(data));
    assert_eq!(
        probe.resource_state(ResourceHandle::Buffer(target)),
        Some(ResourceState::ShaderResource)
    );
    assert!(probe.violations().is_empty());
}

#[test]
fn test_graphics_read_before_compute_fence_is_hazard() {
    let backend = HeadlessBackend::default();
    let probe = backend.probe();
    let mut ctx = backend
        .into_context(&ContextDesc::new("hazard", Extent2D::new(32, 32), 2).with_compute_queue())
        .unwrap();

    let device = ctx.device();
    let volume = device
        .create_buffer(&BufferDesc::new("volume", BufferUsage::Storage, 256), None)
        .unwrap();
    let compute_rs = device
        .create_root_signature(&RootSignatureDesc {
            label: "compute".into(),
            parameters: vec![RootParameter::DescriptorTable {
                kind: DescriptorKind::UnorderedAccess,
                visibility: ShaderVisibility::All,
            }],
        })
        .unwrap();
    let graphics_rs = device
        .create_root_signature(&RootSignatureDesc {
            label: "graphics".into(),
            parameters: vec![RootParameter::DescriptorTable {
                kind: DescriptorKind::ShaderResource,
                visibility: ShaderVisibility::Pixel,
            }],
        })
        .unwrap();
    let compute_shader = shader(ShaderStage::Compute);
    let compute_pso = device
        .create_compute_pipeline(&ComputePipelineDesc {
            label: "update".into(),
            root_signature: compute_rs,
            shader: &compute_shader,
        })
        .unwrap();
    let vs = shader(ShaderStage::Vertex);
    let ps = shader(ShaderStage::Fragment);
    let graphics_pso = device
        .create_graphics_pipeline(&GraphicsPipelineDesc {
            label: "draw".into(),
            root_signature: graphics_rs,
            vertex_shader: &vs,
            pixel_shader: &ps,
            vertex_layout: VertexLayout::default(),
            color_format: Format::Bgra8Unorm,
            depth_format: None,
            depth_compare: Default::default(),
            cull_mode: Default::default(),
        })
        .unwrap();
    let heap = device.create_descriptor_heap(2).unwrap();
    let uav = device
        .create_descriptor_table(
            heap,
            compute_rs,
            0,
            &ResourceView::UnorderedAccess {
                buffer: volume,
                size: 256,
            },
        )
        .unwrap();
    let srv = device
        .create_descriptor_table(
            heap,
            graphics_rs,
            0,
            &ResourceView::ShaderResource {
                buffer: volume,
                size: 256,
            },
        )
        .unwrap();

    let mut compute = ctx.create_recorder(QueueKind::Compute).unwrap();
    compute.reset(Some(compute_pso)).unwrap();
    compute.set_root_signature(BindPoint::Compute, compute_rs).unwrap();
    compute.set_descriptor_table(BindPoint::Compute, 0, uav).unwrap();
    compute.dispatch([1, 1, 1]).unwrap();
    compute.close().unwrap();
    ctx.execute(&mut compute).unwrap();

    let back_buffer = ctx.current_back_buffer_index();
    let (to_rt, to_present) = back_buffer_barriers(back_buffer);
    let mut graphics = ctx.create_recorder(QueueKind::Graphics).unwrap();
    graphics.reset(Some(graphics_pso)).unwrap();
    graphics.set_root_signature(BindPoint::Graphics, graphics_rs).unwrap();
    graphics.set_descriptor_table(BindPoint::Graphics, 0, srv).unwrap();
    graphics.resource_barrier(&[to_rt]).unwrap();
    graphics.set_render_target(back_buffer, None).unwrap();
    graphics.draw_indexed(36, 1).unwrap();
    graphics.resource_barrier(&[to_present]).unwrap();
    graphics.close().unwrap();

    // The compute write has no signal behind it yet
    assert!(matches!(ctx.execute(&mut graphics), Err(RhiError::Hazard(_))));

    // Signaled but not yet observed by the CPU
    let ticket = ctx.signal(QueueKind::Compute).unwrap();
    assert!(matches!(ctx.execute(&mut graphics), Err(RhiError::Hazard(_))));

    ctx.wait(ticket).unwrap();
    ctx.execute(&mut graphics).unwrap();
    ctx.flush(QueueKind::Graphics).unwrap();

    assert_eq!(probe.hazards().len(), 2);
    assert!(probe.violations().is_empty());
    assert!(probe.journal().contains(&GpuEvent::Draw {
        back_buffer: Some(back_buffer),
        index_count: 36,
    }));
}

#[test]
fn test_threaded_timeline_retires_work() {
    let mut ctx = context(HeadlessConfig::default().threaded(Duration::from_millis(1)), true);
    for _ in 0..4 {
        let compute = ctx.signal(QueueKind::Compute).unwrap();
        ctx.wait(compute).unwrap();
        let graphics = ctx.flush(QueueKind::Graphics).unwrap();
        assert!(ctx.fence().completed() >= graphics.value());
    }
}
