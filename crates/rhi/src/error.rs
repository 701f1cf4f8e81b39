//! RHI-specific error types.

use thiserror::Error;

use crate::barrier::{ResourceHandle, ResourceState};
use crate::types::QueueKind;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid configuration (rejected before any GPU work)
    #[error("Config error: {0}")]
    ConfigError(String),

    /// The recorder's previous submission has not completed on the GPU
    #[error("{queue} recorder is busy: waiting on fence value {pending}, completed {completed}")]
    ResourceBusy {
        queue: QueueKind,
        pending: u64,
        completed: u64,
    },

    /// An operation was issued in the wrong recorder or context state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A barrier's `before` state does not match the resource's tracked state
    #[error("Barrier on {resource:?} expects {expected:?} but resource is in {actual:?}")]
    BarrierMismatch {
        resource: ResourceHandle,
        expected: ResourceState,
        actual: ResourceState,
    },

    /// A recording left resources in a different state than it found them
    #[error("Recording closed with {0} resource(s) not returned to their entry state")]
    UnbalancedBarriers(usize),

    /// A fence value was signaled that is not greater than the last one
    #[error("Fence value {value} reused, last issued {last}")]
    TicketReused { value: u64, last: u64 },

    /// The graphics queue read data the CPU has not yet seen the compute queue finish
    #[error("Hazard: {0}")]
    Hazard(String),

    /// A wait can never be satisfied because nothing pending will signal it
    #[error("Wait for fence value {value} can never complete (completed {completed})")]
    Deadlock { value: u64, completed: u64 },
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

impl From<RhiError> for lockstep_core::Error {
    fn from(err: RhiError) -> Self {
        match err {
            RhiError::ShaderError(msg) => lockstep_core::Error::Shader(msg),
            RhiError::ConfigError(msg) => lockstep_core::Error::Config(msg),
            other => lockstep_core::Error::Gpu(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_names_queue() {
        let err = RhiError::ResourceBusy {
            queue: QueueKind::Compute,
            pending: 7,
            completed: 6,
        };
        assert_eq!(
            err.to_string(),
            "compute recorder is busy: waiting on fence value 7, completed 6"
        );
    }

    #[test]
    fn test_conversion_to_core_error() {
        let core: lockstep_core::Error = RhiError::ConfigError("bad".into()).into();
        assert!(matches!(core, lockstep_core::Error::Config(_)));

        let core: lockstep_core::Error = RhiError::ShaderError("missing".into()).into();
        assert!(matches!(core, lockstep_core::Error::Shader(_)));

        let core: lockstep_core::Error = RhiError::NoSuitableGpu.into();
        assert!(matches!(core, lockstep_core::Error::Gpu(_)));
    }
}
