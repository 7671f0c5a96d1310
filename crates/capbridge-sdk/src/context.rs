//! CallContext - cancellation and deadline for a bridge call
//!
//! Passed to every lifecycle and dispatch call. Bridges check it before
//! blocking or long-running sub-operations and surface `Cancelled` instead
//! of swallowing the signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{BridgeError, BridgeResult};

/// Per-call context carrying a cancellation flag and optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Handle used by the caller to cancel every context sharing its flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Signal cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl CallContext {
    /// Context with no deadline that is never cancelled unless asked to
    pub fn background() -> Self {
        Self::default()
    }

    /// Copy of this context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Copy of this context that expires at `deadline`.
    /// An earlier existing deadline is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    /// Handle that cancels this context (and its copies)
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Fail with `Cancelled` for `operation` if the context is done
    pub fn check(&self, operation: &str) -> BridgeResult<()> {
        if self.is_done() {
            return Err(BridgeError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_never_done() {
        let ctx = CallContext::background();
        assert!(!ctx.is_done());
        assert!(ctx.check("op").is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_copies() {
        let ctx = CallContext::background();
        let child = ctx.with_timeout(Duration::from_secs(60));
        ctx.cancel_handle().cancel();
        assert!(child.is_done());
        assert_eq!(
            child.check("stream").unwrap_err(),
            BridgeError::Cancelled {
                operation: "stream".into()
            }
        );
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = CallContext::background().with_deadline(Instant::now());
        assert!(ctx.is_done());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let soon = Instant::now() + Duration::from_secs(1);
        let ctx = CallContext::background()
            .with_deadline(soon)
            .with_timeout(Duration::from_secs(3600));
        assert_eq!(ctx.deadline(), Some(soon));
    }
}
