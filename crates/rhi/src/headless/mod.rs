//! Headless backend.
//!
//! A software stand-in for a GPU. Command lists are not rasterized; instead
//! the backend retires submissions on a simulated timeline and keeps a
//! journal of what ran, which resource states were actually observed, and
//! whether the CPU respected the fence protocol. Tests drive the samples
//! through it.
//!
//! By default the timeline is lazy: queued work only retires when the CPU
//! waits, which makes every run deterministic. With
//! [`HeadlessConfig::threaded`] a worker thread retires work as it arrives.

mod device;
mod swap_chain;
mod timeline;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{Backend, ContextDesc};
use crate::barrier::{ResourceHandle, ResourceState};
use crate::context::DeviceContext;
use crate::error::RhiResult;
use crate::types::{BufferId, Extent2D, QueueKind};

pub use device::{HeadlessDevice, HeadlessEncoder, HeadlessQueue};
pub use swap_chain::HeadlessSwapChain;
pub use timeline::{GpuEvent, HeadlessFence};

use timeline::Shared;

/// Headless backend settings.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    /// Retire work on a worker thread instead of on CPU waits.
    pub threaded: bool,
    /// Delay before each job when threaded.
    pub latency: Duration,
    /// Reported adapter name.
    pub adapter_name: String,
    /// Back-buffer index sequence after each present (round-robin if unset).
    pub present_order: Option<Vec<u32>>,
    /// Extent the surface dictates on resize, whatever size was requested.
    pub surface_extent: Option<Extent2D>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            threaded: false,
            latency: Duration::ZERO,
            adapter_name: "Headless Timeline".to_string(),
            present_order: None,
            surface_extent: None,
        }
    }
}

impl HeadlessConfig {
    pub fn threaded(mut self, latency: Duration) -> Self {
        self.threaded = true;
        self.latency = latency;
        self
    }

    pub fn with_present_order(mut self, order: Vec<u32>) -> Self {
        self.present_order = Some(order);
        self
    }

    pub fn with_surface_extent(mut self, extent: Extent2D) -> Self {
        self.surface_extent = Some(extent);
        self
    }
}

/// The headless [`Backend`].
pub struct HeadlessBackend {
    shared: Arc<Shared>,
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// Inspection handle that stays valid after the backend is consumed.
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl Backend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Encoder = HeadlessEncoder;
    type Queue = HeadlessQueue;
    type Signal = HeadlessFence;
    type SwapChain = HeadlessSwapChain;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn into_context(self, desc: &ContextDesc) -> RhiResult<DeviceContext<Self>> {
        info!(
            "Creating headless context '{}' ({}x{}, {} buffers)",
            desc.label, desc.extent.width, desc.extent.height, desc.buffer_count
        );
        let swap_chain = HeadlessSwapChain::new(
            Arc::clone(&self.shared),
            desc.buffer_count,
            desc.extent,
            desc.format,
        )?;
        let graphics = HeadlessQueue {
            kind: QueueKind::Graphics,
            shared: Arc::clone(&self.shared),
        };
        let compute = desc.compute_queue.then(|| HeadlessQueue {
            kind: QueueKind::Compute,
            shared: Arc::clone(&self.shared),
        });
        let fence = HeadlessFence {
            shared: Arc::clone(&self.shared),
        };
        let device = HeadlessDevice::new(self.shared)?;
        Ok(DeviceContext::from_parts(device, graphics, compute, fence, swap_chain))
    }
}

/// Read-only view of the simulated GPU for tests.
#[derive(Clone)]
pub struct HeadlessProbe {
    shared: Arc<Shared>,
}

impl HeadlessProbe {
    /// Everything the timeline did so far.
    pub fn journal(&self) -> Vec<GpuEvent> {
        self.shared
            .lock()
            .map(|state| state.journal.clone())
            .unwrap_or_default()
    }

    /// Barrier and usage violations.
    pub fn violations(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Violation(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Cross-queue hazards.
    pub fn hazards(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Hazard(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Fence values in the order the queues wrote them.
    pub fn signals(&self) -> Vec<(QueueKind, u64)> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Signaled { queue, value } => Some((queue, value)),
                _ => None,
            })
            .collect()
    }

    /// Back-buffer indices in presentation order.
    pub fn presented(&self) -> Vec<u32> {
        self.journal()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::Presented { back_buffer } => Some(back_buffer),
                _ => None,
            })
            .collect()
    }

    /// The fence value the simulated GPU has reached.
    pub fn completed(&self) -> u64 {
        self.shared.lock().map(|state| state.completed).unwrap_or(0)
    }

    /// State of a resource on the GPU timeline.
    pub fn resource_state(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.shared
            .lock()
            .ok()
            .and_then(|state| state.states.get(&resource).copied())
    }

    /// Contents of a buffer as the GPU sees them.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        let state = self.shared.lock().ok()?;
        state.buffer(buffer).ok().map(|record| record.data.clone())
    }

    /// True while submitted work has not retired.
    pub fn has_pending_work(&self) -> bool {
        self.shared
            .lock()
            .map(|state| state.has_pending_jobs())
            .unwrap_or(false)
    }

    /// Extents of the depth buffers that are still alive.
    pub fn live_depth_extents(&self) -> Vec<Extent2D> {
        self.shared
            .lock()
            .map(|state| state.depth_buffers.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of buffers created so far, in creation order.
    pub fn buffers(&self) -> Vec<(BufferId, String)> {
        self.shared
            .lock()
            .map(|state| {
                state
                    .buffers
                    .iter()
                    .enumerate()
                    .map(|(index, record)| (BufferId(index as u32), record.desc.label.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
