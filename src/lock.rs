//! Advisory "sync in progress" flag with a TTL.
//!
//! Only invocations using the same lock name exclude each other. A crashed
//! holder blocks others until its TTL lapses.
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::store::{LockAttempt, SyncLedger};

pub const HISTORICAL_LOCK: &str = "historical";
pub const RECURRING_LOCK: &str = "recurring";

/// Holder id for this process.
pub fn process_holder() -> String {
    format!("pid-{}", std::process::id())
}

#[must_use = "release the guard when the sync finishes"]
pub struct SyncGuard<'a> {
    ledger: &'a dyn SyncLedger,
    name: String,
    holder: String,
}

impl<'a> SyncGuard<'a> {
    pub async fn acquire(
        ledger: &'a dyn SyncLedger,
        clock: &dyn Clock,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<SyncGuard<'a>, SyncError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| SyncError::Configuration("lock ttl out of range".into()))?;
        let now = clock.now();
        match ledger.try_acquire_lock(name, holder, now, now + ttl).await? {
            LockAttempt::Acquired => {
                debug!(lock = name, holder, "sync lock acquired");
                Ok(SyncGuard {
                    ledger,
                    name: name.to_string(),
                    holder: holder.to_string(),
                })
            }
            LockAttempt::HeldBy(holder) => Err(SyncError::Locked { holder }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(self) -> Result<(), SyncError> {
        if !self.ledger.release_lock(&self.name, &self.holder).await? {
            warn!(lock = %self.name, holder = %self.holder, "sync lock was already taken over");
        }
        Ok(())
    }
}
