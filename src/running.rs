use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Process-wide "keep going" flag shared by every thread.
///
/// Starts true and goes false exactly once; it is never set back. Only plain
/// atomic loads and stores are used.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}
