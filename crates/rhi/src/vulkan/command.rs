//! Command pool management and command list translation.
//!
//! [`VulkanEncoder`] is the allocator/command-buffer pair behind a
//! [`crate::CommandRecorder`]. When a recording closes it is lowered into a
//! primary command buffer:
//!
//! - Resource barriers become `vkCmdPipelineBarrier2` calls
//! - Render targets become dynamic rendering scopes, opened lazily at the
//!   first draw so that pending clears turn into attachment load ops
//! - Root signature slots bind descriptor sets at the same index

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::backend::CommandEncoder;
use crate::barrier::{Barrier, ResourceHandle, ResourceState};
use crate::command::Command;
use crate::error::{RhiError, RhiResult};
use crate::types::{
    BindPoint, BufferId, DepthBufferId, IndexFormat, QueueKind, RootSignatureId, ScissorRect,
    Viewport,
};
use crate::vulkan::depth::depth_subresource_range;
use crate::vulkan::device::Device;
use crate::vulkan::pipeline::bind_point_to_vk;
use crate::vulkan::registry::{Registry, SharedRegistry};
use crate::vulkan::swapchain::color_subresource_range;

/// Vulkan command pool wrapper.
///
/// A command pool is used to allocate command buffers. Each pool is associated
/// with a specific queue family and can only allocate command buffers that
/// will be submitted to queues of that family.
///
/// # Thread Safety
///
/// Command pools are not thread-safe. Every recorder owns its own pool.
pub struct CommandPool {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
    /// Queue family index this pool belongs to.
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool for short-lived command buffers on a queue family.
    ///
    /// Command buffers are never reset individually; the whole pool is reset
    /// once its last submission retired.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Allocates a single primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        buffers.into_iter().next().ok_or_else(|| {
            RhiError::InvalidState("Command buffer allocation returned nothing".to_string())
        })
    }

    /// Resets every command buffer allocated from this pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }

}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Synchronization scope of a resource state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateScope {
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

const SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
);

/// Stages a compute queue can execute.
const COMPUTE_QUEUE_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags2::COPY.as_raw()
        | vk::PipelineStageFlags2::ALL_TRANSFER.as_raw()
        | vk::PipelineStageFlags2::DRAW_INDIRECT.as_raw()
        | vk::PipelineStageFlags2::ALL_COMMANDS.as_raw(),
);

/// Access bits that only graphics stages produce or consume.
const GRAPHICS_ONLY_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags2::INDEX_READ.as_raw(),
);

impl StateScope {
    /// Stages, access and image layout a resource in `state` is used with.
    pub fn of(state: ResourceState) -> Self {
        use vk::AccessFlags2 as A;
        use vk::PipelineStageFlags2 as S;

        let (stages, access, layout) = match state {
            ResourceState::Present => (S::ALL_COMMANDS, A::NONE, vk::ImageLayout::PRESENT_SRC_KHR),
            ResourceState::RenderTarget => (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            ResourceState::UnorderedAccess => (
                SHADER_STAGES,
                A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
                vk::ImageLayout::GENERAL,
            ),
            ResourceState::ShaderResource => (
                SHADER_STAGES,
                A::SHADER_STORAGE_READ | A::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            ResourceState::CopySource => {
                (S::COPY, A::TRANSFER_READ, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            }
            ResourceState::CopyDest => {
                (S::COPY, A::TRANSFER_WRITE, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            }
            ResourceState::DepthWrite => (
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ),
            ResourceState::VertexAndConstantBuffer => (
                S::VERTEX_ATTRIBUTE_INPUT | SHADER_STAGES,
                A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ,
                vk::ImageLayout::GENERAL,
            ),
            ResourceState::IndexBuffer => (S::INDEX_INPUT, A::INDEX_READ, vk::ImageLayout::GENERAL),
            ResourceState::GenericRead => (S::ALL_COMMANDS, A::MEMORY_READ, vk::ImageLayout::GENERAL),
        };
        Self {
            stages,
            access,
            layout,
        }
    }

    /// Restrict the scope to what `queue` supports.
    pub fn for_queue(self, queue: QueueKind) -> Self {
        match queue {
            QueueKind::Graphics => self,
            QueueKind::Compute => {
                let stages = self.stages & COMPUTE_QUEUE_STAGES;
                let access = self.access & !GRAPHICS_ONLY_ACCESS;
                Self {
                    stages: if stages.is_empty() {
                        vk::PipelineStageFlags2::ALL_COMMANDS
                    } else {
                        stages
                    },
                    access,
                    layout: self.layout,
                }
            }
        }
    }
}

fn to_vk_viewport(viewport: &Viewport) -> vk::Viewport {
    // Flipped so clip-space +Y points up
    vk::Viewport {
        x: viewport.x,
        y: viewport.y + viewport.height,
        width: viewport.width,
        height: -viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn to_vk_rect(scissor: &ScissorRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: scissor.left,
            y: scissor.top,
        },
        extent: vk::Extent2D {
            width: (scissor.right - scissor.left).max(0) as u32,
            height: (scissor.bottom - scissor.top).max(0) as u32,
        },
    }
}

fn to_vk_index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

fn bind_slot(bind_point: BindPoint) -> usize {
    match bind_point {
        BindPoint::Graphics => 0,
        BindPoint::Compute => 1,
    }
}

/// Command allocator and primary command buffer of one recorder.
pub struct VulkanEncoder {
    device: Arc<Device>,
    registry: SharedRegistry,
    queue: QueueKind,
    command_buffer: vk::CommandBuffer,
    /// Dropped last; frees `command_buffer`
    pool: CommandPool,
}

impl VulkanEncoder {
    /// Creates an encoder whose command buffer submits to `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation or command buffer allocation fails.
    pub(crate) fn new(device: Arc<Device>, registry: SharedRegistry, queue: QueueKind) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), device.queue_family(queue))?;
        let command_buffer = pool.allocate_command_buffer()?;
        Ok(Self {
            device,
            registry,
            queue,
            command_buffer,
            pool,
        })
    }

    /// The command buffer holding the last encoded recording.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn queue(&self) -> QueueKind {
        self.queue
    }
}

impl CommandEncoder for VulkanEncoder {
    fn reset(&mut self) -> RhiResult<()> {
        self.pool.reset()
    }

    fn encode(&mut self, commands: &[Command]) -> RhiResult<()> {
        let mut registry = Registry::lock(&self.registry)?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.command_buffer, &begin_info)?;
        }

        let mut translator = Translator {
            device: &self.device,
            registry: &mut registry,
            cmd: self.command_buffer,
            queue: self.queue,
            root_signatures: [None; 2],
            target: None,
            rendering: false,
            color_clears: Vec::new(),
            depth_clears: Vec::new(),
        };
        for command in commands {
            translator.translate(command)?;
        }
        translator.finish()?;

        unsafe {
            self.device.handle().end_command_buffer(self.command_buffer)?;
        }
        trace!(queue = %self.queue, commands = commands.len(), "Encoded command buffer");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RenderTarget {
    back_buffer: u32,
    depth: Option<DepthBufferId>,
}

/// Lowers one recording into the open command buffer.
struct Translator<'a> {
    device: &'a Arc<Device>,
    registry: &'a mut Registry,
    cmd: vk::CommandBuffer,
    queue: QueueKind,
    root_signatures: [Option<RootSignatureId>; 2],
    target: Option<RenderTarget>,
    rendering: bool,
    color_clears: Vec<(u32, [f32; 4])>,
    depth_clears: Vec<(DepthBufferId, f32)>,
}

impl Translator<'_> {
    fn raw(&self) -> &ash::Device {
        self.device.handle()
    }

    fn translate(&mut self, command: &Command) -> RhiResult<()> {
        match command {
            Command::ResourceBarrier(barriers) => {
                self.flush_clears()?;
                self.barriers(barriers)?;
            }
            Command::SetViewport(viewport) => unsafe {
                self.raw()
                    .cmd_set_viewport(self.cmd, 0, &[to_vk_viewport(viewport)]);
            },
            Command::SetScissor(scissor) => unsafe {
                self.raw().cmd_set_scissor(self.cmd, 0, &[to_vk_rect(scissor)]);
            },
            Command::SetRootSignature {
                bind_point,
                root_signature,
            } => {
                self.registry.root_signature(*root_signature)?;
                self.root_signatures[bind_slot(*bind_point)] = Some(*root_signature);
            }
            Command::SetPipeline(pipeline) => {
                let pipeline = self.registry.pipeline(*pipeline)?;
                unsafe {
                    self.raw().cmd_bind_pipeline(
                        self.cmd,
                        bind_point_to_vk(pipeline.bind_point()),
                        pipeline.handle(),
                    );
                }
            }
            // Descriptor pools need no binding
            Command::SetDescriptorHeap(_) => {}
            Command::SetDescriptorTable {
                bind_point,
                slot,
                table,
            } => {
                let set = self.registry.table(*table)?;
                self.bind_set(*bind_point, *slot, set)?;
            }
            Command::SetRootConstantBuffer {
                bind_point,
                slot,
                buffer,
            } => {
                let root_signature = self.bound_root_signature(*bind_point)?;
                let set = self
                    .registry
                    .root_constant_set(self.device, root_signature, *slot, *buffer)?;
                self.bind_set(*bind_point, *slot, set)?;
            }
            Command::SetRenderTarget { back_buffer, depth } => {
                let target = RenderTarget {
                    back_buffer: *back_buffer,
                    depth: *depth,
                };
                if self.target != Some(target) {
                    self.end_rendering();
                    self.target = Some(target);
                }
            }
            Command::ClearRenderTarget { back_buffer, color } => {
                self.clear_color(*back_buffer, *color)?;
            }
            Command::ClearDepth { depth, value } => self.clear_depth(*depth, *value)?,
            Command::SetVertexBuffer { buffer, .. } => {
                let handle = self.registry.buffer(*buffer)?.handle();
                unsafe {
                    self.raw()
                        .cmd_bind_vertex_buffers(self.cmd, 0, &[handle], &[0]);
                }
            }
            Command::SetIndexBuffer { buffer, format } => {
                let handle = self.registry.buffer(*buffer)?.handle();
                unsafe {
                    self.raw()
                        .cmd_bind_index_buffer(self.cmd, handle, 0, to_vk_index_type(*format));
                }
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                self.begin_rendering()?;
                unsafe {
                    self.raw().cmd_draw_indexed(
                        self.cmd,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    );
                }
            }
            Command::Dispatch { x, y, z } => {
                self.flush_clears()?;
                unsafe {
                    self.raw().cmd_dispatch(self.cmd, *x, *y, *z);
                }
            }
            Command::CopyBuffer { src, dst, size } => {
                self.flush_clears()?;
                self.copy_buffer(*src, *dst, *size)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> RhiResult<()> {
        self.flush_clears()
    }

    fn bound_root_signature(&self, bind_point: BindPoint) -> RhiResult<RootSignatureId> {
        self.root_signatures[bind_slot(bind_point)].ok_or_else(|| {
            RhiError::InvalidState(format!(
                "{:?} binding recorded before a root signature was set",
                bind_point
            ))
        })
    }

    fn bind_set(&self, bind_point: BindPoint, slot: u32, set: vk::DescriptorSet) -> RhiResult<()> {
        let root_signature = self.bound_root_signature(bind_point)?;
        let layout = self.registry.root_signature(root_signature)?;
        layout.parameter(slot)?;
        unsafe {
            self.raw().cmd_bind_descriptor_sets(
                self.cmd,
                bind_point_to_vk(bind_point),
                layout.pipeline_layout(),
                slot,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, size: u64) -> RhiResult<()> {
        let src = self.registry.buffer(src)?;
        let dst = self.registry.buffer(dst)?;
        if size > src.size() || size > dst.size() {
            return Err(RhiError::InvalidHandle(format!(
                "Copy of {} bytes exceeds source ({}) or destination ({})",
                size,
                src.size(),
                dst.size()
            )));
        }
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.raw()
                .cmd_copy_buffer(self.cmd, src.handle(), dst.handle(), &[region]);
        }
        Ok(())
    }

    fn barriers(&self, barriers: &[Barrier]) -> RhiResult<()> {
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();

        for barrier in barriers {
            let src = StateScope::of(barrier.before).for_queue(self.queue);
            let dst = StateScope::of(barrier.after).for_queue(self.queue);
            match barrier.resource {
                ResourceHandle::Buffer(id) => {
                    let buffer = self.registry.buffer(id)?;
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src.stages)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stages)
                            .dst_access_mask(dst.access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer.handle())
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                ResourceHandle::BackBuffer(index) => {
                    let image = self.registry.back_buffer(index)?.image;
                    // Acquired images carry no content worth preserving
                    let old_layout = if barrier.before == ResourceState::Present {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        src.layout
                    };
                    image_barriers.push(image_barrier(
                        image,
                        color_subresource_range(),
                        src,
                        dst,
                        old_layout,
                    ));
                }
                ResourceHandle::Depth(id) => {
                    let image = self.registry.depth(id)?.image();
                    image_barriers.push(image_barrier(
                        image,
                        depth_subresource_range(),
                        src,
                        dst,
                        src.layout,
                    ));
                }
            }
        }

        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe {
            self.raw().cmd_pipeline_barrier2(self.cmd, &dependency);
        }
        Ok(())
    }

    fn clear_color(&mut self, back_buffer: u32, color: [f32; 4]) -> RhiResult<()> {
        self.registry.back_buffer(back_buffer)?;
        if self.rendering && self.target.map(|t| t.back_buffer) == Some(back_buffer) {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            };
            self.clear_attachment(attachment);
            return Ok(());
        }
        self.color_clears.retain(|(index, _)| *index != back_buffer);
        self.color_clears.push((back_buffer, color));
        Ok(())
    }

    fn clear_depth(&mut self, depth: DepthBufferId, value: f32) -> RhiResult<()> {
        self.registry.depth(depth)?;
        if self.rendering && self.target.and_then(|t| t.depth) == Some(depth) {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: value,
                        stencil: 0,
                    },
                },
            };
            self.clear_attachment(attachment);
            return Ok(());
        }
        self.depth_clears.retain(|(id, _)| *id != depth);
        self.depth_clears.push((depth, value));
        Ok(())
    }

    fn clear_attachment(&self, attachment: vk::ClearAttachment) {
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.registry.extent(),
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.raw().cmd_clear_attachments(self.cmd, &[attachment], &[rect]);
        }
    }

    /// Open a rendering scope on the current target, folding in pending clears.
    fn begin_rendering(&mut self) -> RhiResult<()> {
        if self.rendering {
            return Ok(());
        }
        let target = self.target.ok_or_else(|| {
            RhiError::InvalidState("Draw recorded without a render target".to_string())
        })?;

        let color = take_clear(&mut self.color_clears, |(index, _)| *index == target.back_buffer)
            .map(|(_, color)| color);
        let depth_clear = match target.depth {
            Some(depth) => {
                take_clear(&mut self.depth_clears, |(id, _)| *id == depth).map(|(_, value)| value)
            }
            None => None,
        };
        self.render(Some((target.back_buffer, color)), target.depth.map(|d| (d, depth_clear)))?;
        self.rendering = true;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe {
                self.raw().cmd_end_rendering(self.cmd);
            }
            self.rendering = false;
        }
    }

    /// Close any open scope and execute clears no draw consumed.
    fn flush_clears(&mut self) -> RhiResult<()> {
        self.end_rendering();
        for (back_buffer, color) in std::mem::take(&mut self.color_clears) {
            self.render(Some((back_buffer, Some(color))), None)?;
            self.end_rendering_scope();
        }
        for (depth, value) in std::mem::take(&mut self.depth_clears) {
            self.render(None, Some((depth, Some(value))))?;
            self.end_rendering_scope();
        }
        Ok(())
    }

    fn end_rendering_scope(&self) {
        unsafe {
            self.raw().cmd_end_rendering(self.cmd);
        }
    }

    /// Record `vkCmdBeginRendering` for the given attachments. A `Some`
    /// clear value turns the attachment's load op into a clear.
    fn render(
        &self,
        color: Option<(u32, Option<[f32; 4]>)>,
        depth: Option<(DepthBufferId, Option<f32>)>,
    ) -> RhiResult<()> {
        let mut color_attachments = Vec::with_capacity(1);
        if let Some((back_buffer, clear)) = color {
            let view = self.registry.back_buffer(back_buffer)?.view;
            let mut attachment = vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE);
            if let Some(color) = clear {
                attachment = attachment
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    });
            }
            color_attachments.push(attachment);
        }

        let depth_attachment = match depth {
            Some((id, clear)) => {
                let image = self.registry.depth(id)?;
                let mut attachment = vk::RenderingAttachmentInfo::default()
                    .image_view(image.image_view())
                    .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE);
                if let Some(value) = clear {
                    self.initialize_depth(image.image());
                    attachment = attachment
                        .load_op(vk::AttachmentLoadOp::CLEAR)
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: value,
                                stencil: 0,
                            },
                        });
                }
                Some(attachment)
            }
            None => None,
        };

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.registry.extent(),
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        unsafe {
            self.raw().cmd_begin_rendering(self.cmd, &rendering_info);
        }
        Ok(())
    }

    /// Discard a depth image's contents ahead of a clear, leaving it in
    /// attachment layout.
    fn initialize_depth(&self, image: vk::Image) {
        let scope = StateScope::of(ResourceState::DepthWrite);
        let barrier = image_barrier(
            image,
            depth_subresource_range(),
            scope,
            scope,
            vk::ImageLayout::UNDEFINED,
        );
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.raw().cmd_pipeline_barrier2(self.cmd, &dependency);
        }
    }
}

fn take_clear<T: Copy>(clears: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> Option<T> {
    let position = clears.iter().position(matches)?;
    Some(clears.remove(position))
}

fn image_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    src: StateScope,
    dst: StateScope,
    old_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stages)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stages)
        .dst_access_mask(dst.access)
        .old_layout(old_layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = to_vk_viewport(&Viewport {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 600.0,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
    }

    #[test]
    fn test_scissor_rect_to_vk() {
        let rect = to_vk_rect(&ScissorRect {
            left: 10,
            top: 20,
            right: 110,
            bottom: 70,
        });
        assert_eq!((rect.offset.x, rect.offset.y), (10, 20));
        assert_eq!((rect.extent.width, rect.extent.height), (100, 50));
    }

    #[test]
    fn test_state_layouts() {
        assert_eq!(
            StateScope::of(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            StateScope::of(ResourceState::RenderTarget).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            StateScope::of(ResourceState::DepthWrite).layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_compute_queue_scope_drops_graphics_stages() {
        let scope = StateScope::of(ResourceState::VertexAndConstantBuffer).for_queue(QueueKind::Compute);
        assert_eq!(scope.stages, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(scope.access, vk::AccessFlags2::UNIFORM_READ);

        let scope = StateScope::of(ResourceState::IndexBuffer).for_queue(QueueKind::Compute);
        assert_eq!(scope.stages, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert!(scope.access.is_empty());

        let uav = StateScope::of(ResourceState::UnorderedAccess);
        assert_eq!(uav.for_queue(QueueKind::Graphics), uav);
    }

    #[test]
    fn test_take_clear_removes_match() {
        let mut clears = vec![(0u32, 1.0f32), (2, 0.5)];
        assert_eq!(take_clear(&mut clears, |(i, _)| *i == 2), Some((2, 0.5)));
        assert_eq!(clears.len(), 1);
        assert_eq!(take_clear(&mut clears, |(i, _)| *i == 2), None);
    }

    #[test]
    fn test_index_type_mapping() {
        assert_eq!(to_vk_index_type(IndexFormat::Uint16), vk::IndexType::UINT16);
        assert_eq!(to_vk_index_type(IndexFormat::Uint32), vk::IndexType::UINT32);
    }
}
