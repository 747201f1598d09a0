//! Per-track operation guards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Result, TwinTrackError};
use crate::types::TrackKey;

/// Held while an operation is in flight on one track.
#[derive(Debug)]
pub(crate) struct TrackGuard {
    _guard: OwnedMutexGuard<()>,
}

/// One async mutex per track, acquired without waiting.
///
/// A second caller on a busy track is rejected with
/// [`TwinTrackError::TrackBusy`]; nobody queues behind an in-flight call.
#[derive(Debug, Default)]
pub(crate) struct TrackLocks {
    inner: Mutex<HashMap<TrackKey, Arc<AsyncMutex<()>>>>,
}

impl TrackLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn try_acquire(&self, key: TrackKey) -> Result<TrackGuard> {
        let lock = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(inner.entry(key).or_default())
        };
        lock.try_lock_owned()
            .map(|guard| TrackGuard { _guard: guard })
            .map_err(|_| TwinTrackError::TrackBusy {
                lineage: key.lineage,
                role: key.role,
            })
    }

    /// Both tracks of a lineage, in role order. Releases the first guard if
    /// the second track is busy.
    pub(crate) fn try_acquire_pair(&self, a: TrackKey, b: TrackKey) -> Result<(TrackGuard, TrackGuard)> {
        let first = self.try_acquire(a)?;
        let second = self.try_acquire(b)?;
        Ok((first, second))
    }

    /// Drop entries for a lineage nobody is working on anymore.
    pub(crate) fn forget(&self, keys: &[TrackKey]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if inner
                .get(key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                inner.remove(key);
            }
        }
    }
}
