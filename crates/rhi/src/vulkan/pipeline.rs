//! Root layouts and pipeline state objects.
//!
//! A [`RootLayout`] is the Vulkan form of a root signature: one descriptor
//! set layout per slot (set index = slot, binding 0) combined into a
//! pipeline layout. [`Pipeline`] builds graphics pipelines for dynamic
//! rendering and compute pipelines against such a layout.
//!
//! Viewports are flipped (negative height) so clip space is y-up with
//! clockwise front faces, the same conventions the samples' matrices use.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::desc::{
    CompareOp, ComputePipelineDesc, CullMode, DescriptorKind, GraphicsPipelineDesc, RootParameter,
    RootSignatureDesc,
};
use crate::error::{RhiError, RhiResult};
use crate::shader::ShaderStage;
use crate::types::{BindPoint, VertexFormat};
use crate::vulkan::descriptor::DescriptorSetLayout;
use crate::vulkan::device::Device;
use crate::vulkan::shader::ShaderModule;
use crate::vulkan::to_vk_format;

fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

fn vertex_format_to_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Vulkan bind point for a neutral one.
pub fn bind_point_to_vk(bind_point: BindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Pipeline layout plus one descriptor set layout per root slot.
pub struct RootLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    parameters: Vec<RootParameter>,
}

impl RootLayout {
    /// Creates the set layouts and pipeline layout for a root signature.
    ///
    /// # Errors
    ///
    /// Returns an error if any layout creation fails.
    pub fn new(device: Arc<Device>, desc: &RootSignatureDesc) -> RhiResult<Self> {
        let set_layouts = desc
            .parameters
            .iter()
            .map(|param| {
                DescriptorSetLayout::single(device.clone(), param.descriptor_kind(), param.visibility())
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(DescriptorSetLayout::handle).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&handles);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created root layout '{}' with {} slot(s)",
            desc.label,
            handles.len()
        );

        Ok(Self {
            device,
            layout,
            set_layouts,
            parameters: desc.parameters.clone(),
        })
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// The root parameter at `slot`.
    pub fn parameter(&self, slot: u32) -> RhiResult<RootParameter> {
        self.parameters.get(slot as usize).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "Root slot {} out of range ({} slots)",
                slot,
                self.parameters.len()
            ))
        })
    }

    /// Set layout for a descriptor table bound at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is out of range, is not a table, or
    /// holds a different descriptor kind.
    pub fn table_layout(&self, slot: u32, kind: DescriptorKind) -> RhiResult<vk::DescriptorSetLayout> {
        match self.parameter(slot)? {
            RootParameter::DescriptorTable { kind: expected, .. } if expected == kind => {
                Ok(self.set_layouts[slot as usize].handle())
            }
            other => Err(RhiError::InvalidHandle(format!(
                "Root slot {} is {:?}, not a {:?} table",
                slot, other, kind
            ))),
        }
    }

    /// Set layout for a constant buffer bound directly at `slot`.
    pub fn constant_buffer_layout(&self, slot: u32) -> RhiResult<vk::DescriptorSetLayout> {
        match self.parameter(slot)? {
            RootParameter::ConstantBuffer { .. } => Ok(self.set_layouts[slot as usize].handle()),
            other => Err(RhiError::InvalidHandle(format!(
                "Root slot {} is {:?}, not a root constant buffer",
                slot, other
            ))),
        }
    }
}

impl Drop for RootLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Root layout destroyed");
    }
}

/// Vulkan pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: BindPoint,
}

impl Pipeline {
    /// Builds a graphics pipeline for dynamic rendering.
    ///
    /// Viewport and scissor are dynamic state.
    ///
    /// # Errors
    ///
    /// Returns an error if a shader has the wrong stage or pipeline creation fails.
    pub fn graphics(
        device: Arc<Device>,
        layout: vk::PipelineLayout,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> RhiResult<Self> {
        let vertex_shader = ShaderModule::new(device.clone(), desc.vertex_shader, ShaderStage::Vertex)?;
        let fragment_shader =
            ShaderModule::new(device.clone(), desc.pixel_shader, ShaderStage::Fragment)?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(desc.vertex_layout.stride)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| {
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(attribute.location)
                    .format(vertex_format_to_vk(attribute.format))
                    .offset(attribute.offset)
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport state (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.cull_mode))
            .front_face(vk::FrontFace::CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let has_depth = desc.depth_format.is_some();
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth)
            .depth_compare_op(compare_op_to_vk(desc.depth_compare));

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        // Dynamic rendering info (Vulkan 1.3)
        let color_formats = [to_vk_format(desc.color_format)];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = desc.depth_format {
            rendering_info = rendering_info.depth_attachment_format(to_vk_format(depth_format));
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| {
                    RhiError::PipelineError(format!("'{}': {:?}", desc.label, result))
                })?[0]
        };

        info!("Graphics pipeline '{}' created", desc.label);

        Ok(Self {
            device,
            pipeline,
            bind_point: BindPoint::Graphics,
        })
    }

    /// Builds a compute pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader is not a compute shader or pipeline creation fails.
    pub fn compute(
        device: Arc<Device>,
        layout: vk::PipelineLayout,
        desc: &ComputePipelineDesc<'_>,
    ) -> RhiResult<Self> {
        let shader = ShaderModule::new(device.clone(), desc.shader, ShaderStage::Compute)?;

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout);

        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| {
                    RhiError::PipelineError(format!("'{}': {:?}", desc.label, result))
                })?[0]
        };

        info!("Compute pipeline '{}' created", desc.label);

        Ok(Self {
            device,
            pipeline,
            bind_point: BindPoint::Compute,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("{:?} pipeline destroyed", self.bind_point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_op_to_vk() {
        assert_eq!(compare_op_to_vk(CompareOp::Less), vk::CompareOp::LESS);
        assert_eq!(compare_op_to_vk(CompareOp::LessEqual), vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(compare_op_to_vk(CompareOp::Always), vk::CompareOp::ALWAYS);
    }

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(cull_mode_to_vk(CullMode::None), vk::CullModeFlags::NONE);
        assert_eq!(cull_mode_to_vk(CullMode::Back), vk::CullModeFlags::BACK);
        assert_eq!(cull_mode_to_vk(CullMode::Front), vk::CullModeFlags::FRONT);
    }

    #[test]
    fn test_vertex_format_to_vk() {
        assert_eq!(
            vertex_format_to_vk(VertexFormat::Float32x3),
            vk::Format::R32G32B32_SFLOAT
        );
        assert_eq!(
            vertex_format_to_vk(VertexFormat::Float32x2),
            vk::Format::R32G32_SFLOAT
        );
    }
}
