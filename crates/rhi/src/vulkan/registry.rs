//! Object registry shared by the device, encoders and swap chain.
//!
//! Backend-neutral ids index into these tables. Encoders resolve ids when a
//! recording is closed; the swap chain republishes its images on resize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::types::{BufferId, DepthBufferId, DescriptorHeapId, DescriptorTableId, PipelineId, RootSignatureId};
use crate::vulkan::buffer::Buffer;
use crate::vulkan::depth::DepthImage;
use crate::vulkan::descriptor::DescriptorPool;
use crate::vulkan::device::Device;
use crate::vulkan::pipeline::{Pipeline, RootLayout};

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Sets allocated per pool for constant buffers bound straight to a root slot.
const ROOT_CONSTANT_POOL_CAPACITY: u32 = 64;

/// A swap chain image and its color view.
#[derive(Clone, Copy, Debug)]
pub struct BackBuffer {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Registered device objects. Field order is drop order.
#[derive(Default)]
pub struct Registry {
    tables: Vec<vk::DescriptorSet>,
    root_constant_sets: HashMap<(RootSignatureId, u32, BufferId), vk::DescriptorSet>,
    root_constant_pools: Vec<DescriptorPool>,
    heaps: Vec<DescriptorPool>,
    pipelines: Vec<(Pipeline, RootSignatureId)>,
    root_signatures: Vec<RootLayout>,
    depths: Vec<Option<DepthImage>>,
    buffers: Vec<Option<Buffer>>,
    back_buffers: Vec<BackBuffer>,
    extent: vk::Extent2D,
}

fn missing(what: &str, index: usize) -> RhiError {
    RhiError::InvalidHandle(format!("Unknown {} {}", what, index))
}

impl Registry {
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn lock(shared: &SharedRegistry) -> RhiResult<MutexGuard<'_, Registry>> {
        shared
            .lock()
            .map_err(|_| RhiError::InvalidState("registry mutex poisoned".to_string()))
    }

    pub fn insert_buffer(&mut self, buffer: Buffer) -> BufferId {
        self.buffers.push(Some(buffer));
        BufferId(self.buffers.len() as u32 - 1)
    }

    pub fn buffer(&self, id: BufferId) -> RhiResult<&Buffer> {
        self.buffers
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| missing("buffer", id.index()))
    }

    /// Drop a buffer along with any root constant sets pointing at it.
    pub fn remove_buffer(&mut self, id: BufferId) -> RhiResult<()> {
        self.buffers
            .get_mut(id.index())
            .and_then(Option::take)
            .map(drop)
            .ok_or_else(|| missing("buffer", id.index()))?;
        self.root_constant_sets.retain(|&(_, _, buffer), _| buffer != id);
        Ok(())
    }

    pub fn insert_depth(&mut self, depth: DepthImage) -> DepthBufferId {
        self.depths.push(Some(depth));
        DepthBufferId(self.depths.len() as u32 - 1)
    }

    pub fn depth(&self, id: DepthBufferId) -> RhiResult<&DepthImage> {
        self.depths
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| missing("depth buffer", id.index()))
    }

    pub fn remove_depth(&mut self, id: DepthBufferId) -> RhiResult<()> {
        self.depths
            .get_mut(id.index())
            .and_then(Option::take)
            .map(drop)
            .ok_or_else(|| missing("depth buffer", id.index()))
    }

    pub fn insert_root_signature(&mut self, layout: RootLayout) -> RootSignatureId {
        self.root_signatures.push(layout);
        RootSignatureId(self.root_signatures.len() as u32 - 1)
    }

    pub fn root_signature(&self, id: RootSignatureId) -> RhiResult<&RootLayout> {
        self.root_signatures
            .get(id.index())
            .ok_or_else(|| missing("root signature", id.index()))
    }

    pub fn insert_pipeline(&mut self, pipeline: Pipeline, root_signature: RootSignatureId) -> PipelineId {
        self.pipelines.push((pipeline, root_signature));
        PipelineId(self.pipelines.len() as u32 - 1)
    }

    pub fn pipeline(&self, id: PipelineId) -> RhiResult<&Pipeline> {
        self.pipelines
            .get(id.index())
            .map(|(pipeline, _)| pipeline)
            .ok_or_else(|| missing("pipeline", id.index()))
    }

    pub fn insert_heap(&mut self, pool: DescriptorPool) -> DescriptorHeapId {
        self.heaps.push(pool);
        DescriptorHeapId(self.heaps.len() as u32 - 1)
    }

    pub fn heap_mut(&mut self, id: DescriptorHeapId) -> RhiResult<&mut DescriptorPool> {
        self.heaps
            .get_mut(id.index())
            .ok_or_else(|| missing("descriptor heap", id.index()))
    }

    pub fn insert_table(&mut self, set: vk::DescriptorSet) -> DescriptorTableId {
        self.tables.push(set);
        DescriptorTableId(self.tables.len() as u32 - 1)
    }

    pub fn table(&self, id: DescriptorTableId) -> RhiResult<vk::DescriptorSet> {
        self.tables
            .get(id.index())
            .copied()
            .ok_or_else(|| missing("descriptor table", id.index()))
    }

    /// Descriptor set presenting `buffer` as the constant buffer at `slot`
    /// of `root_signature`. Created on first use and cached.
    pub fn root_constant_set(
        &mut self,
        device: &Arc<Device>,
        root_signature: RootSignatureId,
        slot: u32,
        buffer: BufferId,
    ) -> RhiResult<vk::DescriptorSet> {
        let key = (root_signature, slot, buffer);
        if let Some(&set) = self.root_constant_sets.get(&key) {
            return Ok(set);
        }

        let layout = self.root_signature(root_signature)?.constant_buffer_layout(slot)?;
        let (handle, size) = {
            let buffer = self.buffer(buffer)?;
            (buffer.handle(), buffer.size())
        };
        let range = size.min(u64::from(device.max_uniform_buffer_range()));

        let set = match self.root_constant_pools.last_mut().map(|pool| pool.allocate(layout)) {
            Some(Ok(set)) => set,
            _ => {
                let mut pool = DescriptorPool::new(device.clone(), ROOT_CONSTANT_POOL_CAPACITY)?;
                let set = pool.allocate(layout)?;
                self.root_constant_pools.push(pool);
                set
            }
        };
        DescriptorPool::write_raw(device, set, vk::DescriptorType::UNIFORM_BUFFER, handle, range);

        self.root_constant_sets.insert(key, set);
        Ok(set)
    }

    /// Replace the published swap chain images.
    pub fn set_back_buffers(&mut self, back_buffers: Vec<BackBuffer>, extent: vk::Extent2D) {
        self.back_buffers = back_buffers;
        self.extent = extent;
    }

    pub fn back_buffer(&self, index: u32) -> RhiResult<BackBuffer> {
        self.back_buffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| missing("back buffer", index as usize))
    }

    /// Current swap chain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}
