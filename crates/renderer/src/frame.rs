//! Per-frame bookkeeping shared by the samples.
//!
//! Everything here is recomputed from scratch rather than patched, so a
//! resize to the current size produces exactly the same values.

use lockstep_rhi::{Extent2D, ScissorRect, Viewport};

/// Values that depend only on the back-buffer size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeDependent {
    pub extent: Extent2D,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub aspect_ratio: f32,
}

impl SizeDependent {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            extent,
            viewport: Viewport::from_extent(extent),
            scissor: ScissorRect::from_extent(extent),
            aspect_ratio: extent.aspect_ratio(),
        }
    }
}

/// Where the next frame's back-buffer index comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameIndexSource {
    /// Re-read the swap chain's current index after every present and resize.
    #[default]
    SwapChain,
    /// Advance `(index + 1) % buffer_count` after every present, assuming the
    /// presentation engine hands images back in order.
    RoundRobin,
}

impl FrameIndexSource {
    /// Index for the frame after a present.
    ///
    /// `reported` is what the swap chain says is current now.
    pub fn after_present(self, previous: u32, buffer_count: u32, reported: u32) -> u32 {
        match self {
            FrameIndexSource::SwapChain => reported,
            FrameIndexSource::RoundRobin => (previous + 1) % buffer_count.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_dependent_values() {
        let size = SizeDependent::from_extent(Extent2D::new(1280, 720));
        assert_eq!(size.viewport.width, 1280.0);
        assert_eq!(size.viewport.height, 720.0);
        assert_eq!(size.viewport.max_depth, 1.0);
        assert_eq!(size.scissor.right, 1280);
        assert_eq!(size.scissor.bottom, 720);
        assert!((size.aspect_ratio - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_extent_gives_identical_values() {
        let extent = Extent2D::new(800, 600);
        assert_eq!(SizeDependent::from_extent(extent), SizeDependent::from_extent(extent));
    }

    #[test]
    fn test_swap_chain_source_uses_reported_index() {
        let source = FrameIndexSource::SwapChain;
        assert_eq!(source.after_present(0, 3, 2), 2);
        assert_eq!(source.after_present(2, 3, 0), 0);
    }

    #[test]
    fn test_round_robin_wraps() {
        let source = FrameIndexSource::RoundRobin;
        assert_eq!(source.after_present(0, 5, 3), 1);
        assert_eq!(source.after_present(4, 5, 3), 0);
    }
}
