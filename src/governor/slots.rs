//! FIFO admission slot pool.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// Point-in-time view of a slot pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    /// Slots currently held
    pub running: usize,
    /// Callers waiting for a slot
    pub queued: usize,
}

struct PoolState {
    running: usize,
    waiters: VecDeque<oneshot::Sender<SlotGuard>>,
}

/// Counter of held slots plus a FIFO queue of waiters.
///
/// A released slot is handed directly to the oldest live waiter, so the
/// running count never dips in between and a newcomer cannot overtake
/// someone already queued.
pub(crate) struct SlotPool {
    state: Mutex<PoolState>,
}

impl SlotPool {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                running: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Wait for a slot. A `max_concurrent` of zero is treated as one.
    pub(crate) async fn acquire(self: &Arc<Self>, max_concurrent: usize) -> SlotGuard {
        let max_concurrent = max_concurrent.max(1);

        let receiver = {
            let mut state = self.state.lock();
            // Waiters whose futures were dropped no longer hold a place in line.
            state.waiters.retain(|waiter| !waiter.is_closed());

            if state.running < max_concurrent && state.waiters.is_empty() {
                state.running += 1;
                trace!(running = state.running, max_concurrent, "Slot acquired");
                return SlotGuard::new(Arc::clone(self));
            }

            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            trace!(
                running = state.running,
                queued = state.waiters.len(),
                max_concurrent,
                "Slot pool full, queueing"
            );
            receiver
        };

        match receiver.await {
            Ok(guard) => guard,
            // Senders live in the pool, which `self` keeps alive, and are only
            // dropped after a failed send to a closed receiver.
            Err(_) => unreachable!("slot pool dropped a live waiter"),
        }
    }

    pub(crate) fn stats(&self) -> GovernorStats {
        let state = self.state.lock();
        GovernorStats {
            running: state.running,
            queued: state.waiters.iter().filter(|waiter| !waiter.is_closed()).count(),
        }
    }

    fn release(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        state.running = state.running.saturating_sub(1);
                        trace!(running = state.running, "Slot released");
                        return;
                    }
                }
            };

            match next.send(SlotGuard::new(Arc::clone(self))) {
                Ok(()) => {
                    trace!("Slot handed to next waiter");
                    return;
                }
                // The waiter gave up; the slot is still ours to pass on.
                Err(returned) => returned.disarm(),
            }
        }
    }
}

/// A held admission slot. Dropping it releases the slot exactly once.
pub(crate) struct SlotGuard {
    pool: Option<Arc<SlotPool>>,
}

impl SlotGuard {
    fn new(pool: Arc<SlotPool>) -> Self {
        Self { pool: Some(pool) }
    }

    fn disarm(mut self) {
        self.pool = None;
    }
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("armed", &self.pool.is_some())
            .finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
    }
}
