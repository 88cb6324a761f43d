use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide stop signal shared by every worker.
///
/// The flag is monotonic — once raised it stays raised — and idempotent,
/// so any worker may raise it on a fatal condition (non-200 upstream
/// status, stream end, user pressing Enter). Workers check it at the head
/// of their loops; most drain their inbound queue before exiting.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the stop signal.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let stop = StopFlag::new();
        assert!(!stop.is_set());

        let clone = stop.clone();
        clone.set();
        assert!(stop.is_set());

        // setting again is a no-op
        stop.set();
        assert!(stop.is_set());
    }
}
