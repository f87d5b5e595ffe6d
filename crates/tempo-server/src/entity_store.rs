//! Generic per-entity-locked store (`EntityStore<T>`).
//!
//! Each id maps to its own `Entry`, so two unrelated rooms never contend on
//! the same lock. The outer map is only held long enough to look up or
//! insert an `Arc<Entry<T>>`; the actual mutation happens under the
//! per-entity `Mutex`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::timeout;

use tempo_core::error::CoordinatorError;

/// How long `acquire` waits for an entry's lock before giving up with
/// `CoordinatorError::Timeout`.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

struct Entry<T> {
    lock: Mutex<Option<T>>,
    destroyed: AtomicBool,
}

/// A guard over a live entity. Dereferences to `&T`/`&mut T`; dropping it
/// releases the per-entity lock.
pub struct EntityGuard<'a, T> {
    guard: MutexGuard<'a, Option<T>>,
}

impl<T> std::ops::Deref for EntityGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("entity guard holds a live entity")
    }
}

impl<T> std::ops::DerefMut for EntityGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("entity guard holds a live entity")
    }
}

/// A generic, per-id-locked entity store.
///
/// `create` is invoked at most once per id on a lock miss; if the id is
/// concurrently destroyed between the outer map lookup and the inner lock
/// acquisition, `acquire` re-checks the `destroyed` flag and creates a
/// fresh entry rather than handing back a zombie.
pub struct EntityStore<T> {
    entries: RwLock<HashMap<u64, Arc<Entry<T>>>>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntityStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire (creating on miss) the entity for `id`, running `create` if
    /// none exists yet or the existing one was destroyed out from under us.
    pub async fn acquire<F>(&self, id: u64, create: F) -> Result<EntityGuard<'_, T>, CoordinatorError>
    where
        F: FnOnce() -> T,
    {
        loop {
            let entry = {
                let entries = self.entries.read().await;
                entries.get(&id).cloned()
            };

            let entry = match entry {
                Some(entry) if !entry.destroyed.load(Ordering::Acquire) => entry,
                _ => {
                    let mut entries = self.entries.write().await;
                    entries
                        .entry(id)
                        .or_insert_with(|| {
                            Arc::new(Entry {
                                lock: Mutex::new(None),
                                destroyed: AtomicBool::new(false),
                            })
                        })
                        .clone()
                },
            };

            let mut guard = timeout(ACQUIRE_TIMEOUT, entry.lock.lock())
                .await
                .map_err(|_| CoordinatorError::Timeout)?;

            if entry.destroyed.load(Ordering::Acquire) {
                // Lost a race with `destroy`; the entry in the map is now
                // stale, loop around so the next pass allocates a fresh one.
                drop(guard);
                continue;
            }

            if guard.is_none() {
                *guard = Some(create());
            }

            return Ok(EntityGuard { guard });
        }
    }

    /// Look up an existing entity without creating one. Returns
    /// `NotTracked` if the id has never been acquired or was destroyed.
    pub async fn acquire_existing(&self, id: u64) -> Result<EntityGuard<'_, T>, CoordinatorError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&id).cloned()
        };
        let entry = entry.ok_or(CoordinatorError::NotTracked)?;
        if entry.destroyed.load(Ordering::Acquire) {
            return Err(CoordinatorError::NotTracked);
        }
        let guard = timeout(ACQUIRE_TIMEOUT, entry.lock.lock())
            .await
            .map_err(|_| CoordinatorError::Timeout)?;
        if guard.is_none() || entry.destroyed.load(Ordering::Acquire) {
            return Err(CoordinatorError::NotTracked);
        }
        Ok(EntityGuard { guard })
    }

    /// Permanently remove an entity. Marks it destroyed before dropping the
    /// map entry, so any caller racing in via a stale `Arc<Entry<T>>`
    /// observes the flag and re-creates rather than reusing it.
    pub async fn destroy(&self, id: u64) {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(&id)
        };
        if let Some(entry) = entry {
            let mut guard = entry.lock.lock().await;
            entry.destroyed.store(true, Ordering::Release);
            *guard = None;
        }
    }

    /// A best-effort snapshot of every currently-live entity, skipping
    /// entries that are busy rather than blocking (snapshots may
    /// be stale by design).
    pub async fn snapshot_all<U>(&self, f: impl Fn(&T) -> U) -> Vec<U> {
        let entries: Vec<Arc<Entry<T>>> = {
            let entries = self.entries.read().await;
            entries.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.destroyed.load(Ordering::Acquire) {
                continue;
            }
            if let Ok(guard) = entry.lock.try_lock()
                && let Some(value) = guard.as_ref()
            {
                out.push(f(value));
            }
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
