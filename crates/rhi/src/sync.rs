//! CPU/GPU fence.
//!
//! A single monotonically increasing 64-bit counter shared by every queue that
//! synchronizes with the CPU. The CPU hands out tickets; a queue is asked to
//! write the ticket into the fence once its prior work completes; the CPU
//! can then block until the completed value reaches the ticket.
//!
//! # Example
//!
//! ```no_run
//! use lockstep_rhi::{Backend, DeviceContext, QueueKind};
//!
//! # fn example<B: Backend>(ctx: &mut DeviceContext<B>) -> Result<(), lockstep_rhi::RhiError> {
//! // Ask the graphics queue to signal once everything submitted so far is done
//! let ticket = ctx.signal(QueueKind::Graphics)?;
//!
//! // Block until the GPU gets there (returns at once if it already has)
//! ctx.wait(ticket)?;
//! # Ok(())
//! # }
//! ```

use tracing::trace;

use crate::error::RhiResult;

/// Completion source of a fence, implemented by each backend.
///
/// Clones observe the same underlying counter.
pub trait FenceSignal: Clone + Send + Sync + 'static {
    /// Highest value the GPU has written so far.
    fn completed_value(&self) -> u64;

    /// Block the calling thread until `completed_value() >= value`.
    ///
    /// There is no timeout.
    fn wait_for(&self, value: u64) -> RhiResult<()>;
}

/// A value the fence will reach once the work submitted before it completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

impl Ticket {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// The fence: issued counter plus the backend's completion source.
pub struct Fence<S: FenceSignal> {
    signal: S,
    issued: u64,
}

impl<S: FenceSignal> Fence<S> {
    /// Wrap a completion source whose counter starts at zero.
    pub fn new(signal: S) -> Self {
        Self { signal, issued: 0 }
    }

    /// The completion source, for backends that write the counter.
    #[inline]
    pub fn signal(&self) -> &S {
        &self.signal
    }

    /// Last ticket handed out.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Current completed value.
    #[inline]
    pub fn completed(&self) -> u64 {
        self.signal.completed_value()
    }

    /// Reserve the next ticket. Tickets are strictly increasing and never reused.
    pub fn next_ticket(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    /// Block until the fence reaches `ticket`.
    ///
    /// Returns immediately when it already has.
    pub fn wait(&self, ticket: Ticket) -> RhiResult<()> {
        if self.signal.completed_value() >= ticket.0 {
            return Ok(());
        }
        trace!(ticket = ticket.0, "blocking on fence");
        self.signal.wait_for(ticket.0)
    }
}
