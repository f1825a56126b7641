use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A single per-build cancellation token, threaded through every worker,
/// retry wait, and cleanup action (`spec.md` §5). Cloning shares the same
/// underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock().unwrap() = Some(reason.into());
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }

    /// Sleep for `duration`, waking early (and returning `false`) if the
    /// token is cancelled mid-wait. Polls in small slices so cancellation
    /// during a long backoff wait is observed promptly.
    pub fn sleep_cancellable(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observable_and_carries_reason() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel("deadline exceeded");
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("deadline exceeded"));
    }

    #[test]
    fn clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel("external request");
        assert!(token.is_cancelled());
    }
}
