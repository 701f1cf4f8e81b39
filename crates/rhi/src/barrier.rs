//! Resource usage states and transition barriers.
//!
//! Every GPU-visible resource has an implicit current state. Before a
//! resource is used in a different role, a [`Barrier`] must be recorded.
//! [`StateTracker`] follows the barriers of one recording and checks that
//! each resource ends the recording in the state it started in.

use std::collections::HashMap;

use crate::error::{RhiError, RhiResult};
use crate::types::{BufferId, DepthBufferId};

/// Usage role of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Swap chain image ready for presentation.
    Present,
    /// Color attachment.
    RenderTarget,
    /// Read/write storage access.
    UnorderedAccess,
    /// Read-only shader access.
    ShaderResource,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDest,
    /// Depth attachment.
    DepthWrite,
    /// Vertex or constant buffer reads.
    VertexAndConstantBuffer,
    /// Index buffer reads.
    IndexBuffer,
    /// CPU-written upload memory, readable by any stage.
    GenericRead,
}

/// A resource a barrier can refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// Swap chain image by index.
    BackBuffer(u32),
    Buffer(BufferId),
    Depth(DepthBufferId),
}

/// A state transition of one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceHandle,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Barrier {
    pub fn transition(resource: ResourceHandle, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }

    /// The same transition in the opposite direction.
    pub fn reversed(self) -> Self {
        Self {
            resource: self.resource,
            before: self.after,
            after: self.before,
        }
    }
}

/// Net effect of a recording on one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub resource: ResourceHandle,
    pub from: ResourceState,
    pub to: ResourceState,
}

#[derive(Clone, Copy, Debug)]
struct Tracked {
    entry: ResourceState,
    current: ResourceState,
}

/// Tracks resource states across the barriers of a single recording.
///
/// The first barrier touching a resource establishes its entry state.
#[derive(Debug, Default)]
pub struct StateTracker {
    resources: HashMap<ResourceHandle, Tracked>,
    order: Vec<ResourceHandle>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; called when a recorder is reset.
    pub fn clear(&mut self) {
        self.resources.clear();
        self.order.clear();
    }

    /// Apply a batch of barriers.
    ///
    /// Barriers are checked in order, each against the state the earlier
    /// barriers of the batch left behind. A failed batch leaves the tracker
    /// untouched.
    pub fn apply(&mut self, barriers: &[Barrier]) -> RhiResult<()> {
        let mut staged: Vec<(ResourceHandle, Tracked)> = Vec::new();
        for barrier in barriers {
            let known = staged
                .iter()
                .rev()
                .find(|(resource, _)| *resource == barrier.resource)
                .map(|(_, tracked)| *tracked)
                .or_else(|| self.resources.get(&barrier.resource).copied());

            let tracked = match known {
                Some(tracked) if tracked.current != barrier.before => {
                    return Err(RhiError::BarrierMismatch {
                        resource: barrier.resource,
                        expected: barrier.before,
                        actual: tracked.current,
                    });
                }
                Some(tracked) => Tracked {
                    current: barrier.after,
                    ..tracked
                },
                None => Tracked {
                    entry: barrier.before,
                    current: barrier.after,
                },
            };
            staged.push((barrier.resource, tracked));
        }

        for (resource, tracked) in staged {
            if self.resources.insert(resource, tracked).is_none() {
                self.order.push(resource);
            }
        }
        Ok(())
    }

    /// Current state of a resource, if the recording has touched it.
    pub fn current(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.resources.get(&resource).map(|t| t.current)
    }

    /// Resources whose state differs from their entry state, in first-touch order.
    pub fn net_changes(&self) -> Vec<StateChange> {
        self.order
            .iter()
            .filter_map(|resource| {
                let tracked = self.resources.get(resource)?;
                (tracked.entry != tracked.current).then_some(StateChange {
                    resource: *resource,
                    from: tracked.entry,
                    to: tracked.current,
                })
            })
            .collect()
    }

    /// True when every touched resource is back in its entry state.
    pub fn is_balanced(&self) -> bool {
        self.resources.values().all(|t| t.entry == t.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACK: ResourceHandle = ResourceHandle::BackBuffer(0);

    #[test]
    fn test_round_trip_is_balanced() {
        let mut tracker = StateTracker::new();
        let to_rt = Barrier::transition(BACK, ResourceState::Present, ResourceState::RenderTarget);
        tracker.apply(&[to_rt]).unwrap();
        assert!(!tracker.is_balanced());
        assert_eq!(tracker.current(BACK), Some(ResourceState::RenderTarget));

        tracker.apply(&[to_rt.reversed()]).unwrap();
        assert!(tracker.is_balanced());
        assert!(tracker.net_changes().is_empty());
    }

    #[test]
    fn test_mismatched_before_state_is_rejected() {
        let mut tracker = StateTracker::new();
        tracker
            .apply(&[Barrier::transition(
                BACK,
                ResourceState::Present,
                ResourceState::RenderTarget,
            )])
            .unwrap();

        let err = tracker
            .apply(&[Barrier::transition(
                BACK,
                ResourceState::Present,
                ResourceState::RenderTarget,
            )])
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::BarrierMismatch {
                actual: ResourceState::RenderTarget,
                ..
            }
        ));
        // Failed batch leaves state untouched
        assert_eq!(tracker.current(BACK), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn test_batch_chains_through_earlier_barriers() {
        let mut tracker = StateTracker::new();
        tracker
            .apply(&[Barrier::transition(
                BACK,
                ResourceState::Present,
                ResourceState::RenderTarget,
            )])
            .unwrap();

        tracker
            .apply(&[
                Barrier::transition(BACK, ResourceState::RenderTarget, ResourceState::CopySource),
                Barrier::transition(BACK, ResourceState::CopySource, ResourceState::Present),
            ])
            .unwrap();
        assert_eq!(tracker.current(BACK), Some(ResourceState::Present));
        assert!(tracker.is_balanced());
    }

    #[test]
    fn test_batch_rejects_conflicting_before_states() {
        let mut tracker = StateTracker::new();
        let err = tracker
            .apply(&[
                Barrier::transition(BACK, ResourceState::Present, ResourceState::RenderTarget),
                Barrier::transition(BACK, ResourceState::Present, ResourceState::CopySource),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::BarrierMismatch {
                expected: ResourceState::Present,
                actual: ResourceState::RenderTarget,
                ..
            }
        ));
        assert_eq!(tracker.current(BACK), None);
        assert!(tracker.net_changes().is_empty());
    }

    #[test]
    fn test_net_changes_report_one_way_transitions() {
        let mut tracker = StateTracker::new();
        let depth = ResourceHandle::Depth(DepthBufferId(0));
        let buffer = ResourceHandle::Buffer(BufferId(3));
        tracker
            .apply(&[
                Barrier::transition(buffer, ResourceState::CopyDest, ResourceState::UnorderedAccess),
                Barrier::transition(depth, ResourceState::DepthWrite, ResourceState::DepthWrite),
            ])
            .unwrap();

        let changes = tracker.net_changes();
        assert_eq!(
            changes,
            vec![StateChange {
                resource: buffer,
                from: ResourceState::CopyDest,
                to: ResourceState::UnorderedAccess,
            }]
        );
    }

    #[test]
    fn test_clear_forgets_entry_states() {
        let mut tracker = StateTracker::new();
        tracker
            .apply(&[Barrier::transition(
                BACK,
                ResourceState::Present,
                ResourceState::RenderTarget,
            )])
            .unwrap();
        tracker.clear();
        assert!(tracker.is_balanced());
        assert_eq!(tracker.current(BACK), None);
    }
}
