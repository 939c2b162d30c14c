use crate::types::{RadarError, RadarResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a running job
///
/// Long-running stages poll the token between batches; a cancelled run
/// returns `RadarError::Cancelled` and never a partial product.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the token has been triggered
    pub fn check(&self) -> RadarResult<()> {
        if self.is_cancelled() {
            Err(RadarError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let worker_view = token.clone();
        assert!(worker_view.check().is_ok());

        token.cancel();
        assert!(worker_view.is_cancelled());
        assert!(matches!(worker_view.check(), Err(RadarError::Cancelled)));
    }
}
