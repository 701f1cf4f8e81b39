//! Descriptor set management for shader resource binding.
//!
//! Root signature slots map onto descriptor sets: slot `n` is set `n` with a
//! single descriptor at binding 0. A descriptor heap is a pool those sets are
//! allocated from, and a descriptor table is one allocated set.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::desc::{DescriptorKind, ResourceView, ShaderVisibility};
use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;

/// Vulkan descriptor type backing a view kind.
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::ShaderResource | DescriptorKind::UnorderedAccess => {
            vk::DescriptorType::STORAGE_BUFFER
        }
    }
}

/// Shader stages that see a root parameter.
pub fn stage_flags(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    match visibility {
        ShaderVisibility::All => vk::ShaderStageFlags::ALL,
        ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderVisibility::Pixel => vk::ShaderStageFlags::FRAGMENT,
    }
}

/// Descriptor set layout wrapper.
///
/// A descriptor set layout defines the structure of resources that can be
/// bound to a shader. It specifies the binding points, descriptor types,
/// and shader stages that can access each resource.
pub struct DescriptorSetLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout holding one descriptor of `kind` at binding 0.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn single(
        device: Arc<Device>,
        kind: DescriptorKind,
        visibility: ShaderVisibility,
    ) -> RhiResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(descriptor_type(kind))
            .descriptor_count(1)
            .stage_flags(stage_flags(visibility))];
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!("Created descriptor set layout: {:?} ({:?})", kind, visibility);

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Vulkan descriptor pool wrapper: the backing of a descriptor heap.
///
/// Each allocated set holds one descriptor, so `capacity` counts both sets
/// and descriptors.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    capacity: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// Creates a pool for `capacity` single-descriptor sets of any kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is zero or pool creation fails.
    pub fn new(device: Arc<Device>, capacity: u32) -> RhiResult<Self> {
        if capacity == 0 {
            return Err(RhiError::InvalidHandle(
                "Descriptor heap capacity must be greater than 0".to_string(),
            ));
        }

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(capacity),
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!("Created descriptor pool: capacity={}", capacity);

        Ok(Self {
            device,
            pool,
            capacity,
            allocated: 0,
        })
    }

    /// Allocates one set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool is full.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        if self.allocated >= self.capacity {
            return Err(RhiError::InvalidHandle(format!(
                "Descriptor heap full ({} tables)",
                self.capacity
            )));
        }

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        let set = sets
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("Descriptor set allocation returned nothing".into()))?;
        self.allocated += 1;

        Ok(set)
    }

    /// Points the binding of `set` at `buffer`, covering `view`'s size.
    pub fn write(device: &Device, set: vk::DescriptorSet, view: &ResourceView, buffer: vk::Buffer) {
        Self::write_raw(device, set, descriptor_type(view.kind()), buffer, view.size());
    }

    pub(crate) fn write_raw(
        device: &Device,
        set: vk::DescriptorSet,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)];
        let writes = [vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(ty)
            .buffer_info(&buffer_info)];

        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_type_mapping() {
        assert_eq!(
            descriptor_type(DescriptorKind::ConstantBuffer),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            descriptor_type(DescriptorKind::ShaderResource),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(
            descriptor_type(DescriptorKind::UnorderedAccess),
            vk::DescriptorType::STORAGE_BUFFER
        );
    }

    #[test]
    fn test_stage_flags_mapping() {
        assert_eq!(stage_flags(ShaderVisibility::Vertex), vk::ShaderStageFlags::VERTEX);
        assert_eq!(stage_flags(ShaderVisibility::Pixel), vk::ShaderStageFlags::FRAGMENT);
        assert!(stage_flags(ShaderVisibility::All).contains(vk::ShaderStageFlags::COMPUTE));
    }
}
