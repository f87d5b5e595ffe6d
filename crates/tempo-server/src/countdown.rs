//! The countdown background task. `tempo_core::countdown`
//! only describes a countdown's state; this module is what actually waits
//! one out and fires the expiry callback, racing two independent signals
//! per room — *stop* (suppresses the callback) and *skip* (races ahead but
//! still runs it) — via `CancellationToken`s, per the teacher's own
//! cancellation pattern (`state.rs::AppState::shutdown`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tempo_core::ids::RoomId;

struct Handle {
    generation: u64,
    wake: CancellationToken,
    suppress: Arc<AtomicBool>,
}

/// At most one active countdown per room; starting a new one
/// cancels whatever was running.
#[derive(Default)]
pub struct CountdownScheduler {
    active: Mutex<HashMap<RoomId, Handle>>,
    next_generation: AtomicU64,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the room's active countdown, if any: wakes the background task
    /// early and suppresses its completion callback. A no-op if none is
    /// running — callers don't need to check first.
    pub async fn cancel(&self, room_id: RoomId) {
        if let Some(handle) = self.active.lock().await.remove(&room_id) {
            handle.suppress.store(true, Ordering::SeqCst);
            handle.wake.cancel();
        }
    }

    /// Race the room's active countdown ahead to completion: wakes the
    /// background task early but lets its completion callback still run.
    /// Returns `false` if no countdown was active.
    pub async fn skip(&self, room_id: RoomId) -> bool {
        let active = self.active.lock().await;
        match active.get(&room_id) {
            Some(handle) => {
                handle.wake.cancel();
                true
            },
            None => false,
        }
    }

    pub async fn is_active(&self, room_id: RoomId) -> bool {
        self.active.lock().await.contains_key(&room_id)
    }

    /// Start a countdown for `room_id`. `on_expire` runs once the duration
    /// elapses, or once `skip` races it ahead — but never runs if `cancel`
    /// (or a fresh `start` for the same room) wins the race.
    pub async fn start(
        self: &Arc<Self>,
        room_id: RoomId,
        duration: Duration,
        on_expire: impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    ) {
        self.cancel(room_id).await;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let wake = CancellationToken::new();
        let suppress = Arc::new(AtomicBool::new(false));
        self.active.lock().await.insert(
            room_id,
            Handle {
                generation,
                wake: wake.clone(),
                suppress: Arc::clone(&suppress),
            },
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = wake.cancelled() => {
                    tracing::debug!(room_id, "countdown woken early (stop or skip)");
                }
                _ = tokio::time::sleep(duration) => {}
            }

            let fire = {
                let mut active = scheduler.active.lock().await;
                match active.get(&room_id) {
                    Some(h) if h.generation == generation => {
                        active.remove(&room_id);
                        true
                    },
                    _ => false,
                }
            };

            if fire && !suppress.load(Ordering::SeqCst) {
                on_expire().await;
            }
        });
    }
}
