use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between the worker and whoever stops it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    #[cfg(test)]
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }

    /// Raw flag, for signal handlers that set it directly.
    pub fn flag(&self) -> Arc<AtomicBool> { Arc::clone(&self.0) }
}
