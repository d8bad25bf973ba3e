use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GeolapseError, Result};

/// Run-wide cancellation flag, cheap to clone and share across threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GeolapseError::Cancelled)
        } else {
            Ok(())
        }
    }
}
