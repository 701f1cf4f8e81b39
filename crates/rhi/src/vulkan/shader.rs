//! Shader module creation.
//!
//! Modules live only as long as pipeline creation needs them.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::shader::{ShaderBytecode, ShaderStage};
use crate::vulkan::device::Device;

/// Converts a shader stage to Vulkan shader stage flags.
pub fn to_vk_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Vulkan shader module wrapper.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl ShaderModule {
    /// Creates a module from compiled bytecode.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage differs from `expected`, the entry point
    /// contains a NUL byte, or module creation fails.
    pub fn new(device: Arc<Device>, bytecode: &ShaderBytecode, expected: ShaderStage) -> RhiResult<Self> {
        if bytecode.stage != expected {
            return Err(RhiError::ShaderError(format!(
                "Expected a {} shader, got {}",
                expected, bytecode.stage
            )));
        }

        let entry_point = CString::new(bytecode.entry_point.as_str())
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&bytecode.code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!(
            "Created {} shader module with entry point '{}'",
            bytecode.stage, bytecode.entry_point
        );

        Ok(Self {
            device,
            module,
            stage: bytecode.stage,
            entry_point,
        })
    }

    /// Returns the shader stage create info for pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(to_vk_stage(self.stage))
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk() {
        assert_eq!(to_vk_stage(ShaderStage::Vertex), vk::ShaderStageFlags::VERTEX);
        assert_eq!(to_vk_stage(ShaderStage::Fragment), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(to_vk_stage(ShaderStage::Compute), vk::ShaderStageFlags::COMPUTE);
    }
}
