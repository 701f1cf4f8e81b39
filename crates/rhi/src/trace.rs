//! Structured failure reporting.
//!
//! Every failing GPU call is reported as one `tracing` error event carrying
//! the caller's file and line, the name of the call and the status text.
//! What happens next depends on the call site:
//!
//! - initialization and resize paths use [`TraceExt::traced`] and propagate
//!   the error, which is fatal
//! - steady-state submit and present use [`TraceExt::best_effort`], which
//!   logs and carries on with the frame

use std::panic::Location;

use tracing::error;

use crate::error::RhiResult;

/// Extension methods for reporting [`RhiResult`] failures.
pub trait TraceExt<T> {
    /// Log a failure and return it unchanged.
    fn traced(self, call: &str) -> RhiResult<T>;

    /// Log a failure and drop it.
    fn best_effort(self, call: &str) -> Option<T>;
}

impl<T> TraceExt<T> for RhiResult<T> {
    #[track_caller]
    fn traced(self, call: &str) -> RhiResult<T> {
        if let Err(err) = &self {
            report(Location::caller(), call, err);
        }
        self
    }

    #[track_caller]
    fn best_effort(self, call: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                report(Location::caller(), call, &err);
                None
            }
        }
    }
}

fn report(location: &Location<'_>, call: &str, err: &dyn std::fmt::Display) {
    error!(
        file = location.file(),
        line = location.line(),
        call,
        status = %err,
        "line {} in file {}: calling {} failed",
        location.line(),
        location.file(),
        call
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RhiError;

    #[test]
    fn test_traced_passes_values_through() {
        let ok: RhiResult<u32> = Ok(3);
        assert_eq!(ok.traced("present").unwrap(), 3);

        let err: RhiResult<u32> = Err(RhiError::NoSuitableGpu);
        assert!(matches!(err.traced("create device"), Err(RhiError::NoSuitableGpu)));
    }

    #[test]
    fn test_best_effort_swallows_errors() {
        let err: RhiResult<u32> = Err(RhiError::InvalidState("closed".into()));
        assert_eq!(err.best_effort("execute"), None);

        let ok: RhiResult<u32> = Ok(1);
        assert_eq!(ok.best_effort("execute"), Some(1));
    }
}
