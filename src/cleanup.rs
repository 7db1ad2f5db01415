use std::fmt;
use tracing::{info, warn};

use crate::store::ContentStore;

/// Result of the post-sync cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// `None` when duplicate removal failed.
    pub removed: Option<u64>,
    pub optimized: bool,
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.removed {
            Some(n) => write!(f, "removed={n} optimized={}", self.optimized),
            None => write!(f, "removed=failed optimized={}", self.optimized),
        }
    }
}

/// Remove duplicate natural keys, then optimize storage. Both steps are
/// best-effort: failures are logged and show up in the report.
pub async fn run_cleanup(store: &dyn ContentStore) -> CleanupReport {
    let removed = match store.remove_duplicates().await {
        Ok(removed) => {
            if removed > 0 {
                info!(removed, "removed duplicate entries");
            }
            Some(removed)
        }
        Err(err) => {
            warn!(%err, "duplicate removal failed");
            None
        }
    };
    let optimized = match store.optimize().await {
        Ok(()) => true,
        Err(err) => {
            warn!(%err, "storage optimization failed");
            false
        }
    };
    CleanupReport { removed, optimized }
}
