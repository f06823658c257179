//! Item-count-changed subscriptions.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::debug;
use uuid::Uuid;

type Callback = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SubscriptionId(Uuid);

#[derive(Default)]
struct NotifierState {
    subscribers: Vec<(SubscriptionId, Callback)>,
    closed: bool,
    /// Thread currently running callbacks and its nesting depth.
    delivering: Option<(ThreadId, usize)>,
}

impl NotifierState {
    fn callback(&self, id: SubscriptionId) -> Option<Callback> {
        self.subscribers
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, callback)| Arc::clone(callback))
    }
}

/// Fans a committed item count out to registered callbacks.
///
/// Deliveries are serialized and callbacks run outside the notifier lock, so a
/// callback may unsubscribe itself or close the notifier. [`Notifier::close`]
/// is a barrier: once it returns from another thread, no callback is running
/// and none will run again. Closed from inside a callback, the remaining
/// subscribers of that delivery are skipped.
#[derive(Default)]
pub struct Notifier {
    state: Mutex<NotifierState>,
    idle: Condvar,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Notifier")
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .field("delivering", &state.delivering.is_some())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(usize) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push((id, Arc::new(callback)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(existing, _)| *existing != id);
        state.subscribers.len() != before
    }

    /// Delivers `count` to every subscriber; a no-op once closed.
    ///
    /// Subscribers removed while the delivery runs are skipped.
    pub fn notify(&self, count: usize) {
        let Some(_delivery) = self.begin_delivery() else {
            debug!(count, "notifier closed; dropping item count");
            return;
        };

        let ids: Vec<SubscriptionId> = self.lock().subscribers.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let callback = {
                let state = self.lock();
                if state.closed {
                    break;
                }
                state.callback(id)
            };
            if let Some(callback) = callback {
                callback(count);
            }
        }
    }

    /// Drops all subscribers and waits out any delivery running on another
    /// thread.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
        let current = thread::current().id();
        while let Some((owner, _)) = state.delivering {
            if owner == current {
                break;
            }
            state = self.wait_idle(state);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Claims the delivery slot for this thread, waiting for other threads.
    fn begin_delivery(&self) -> Option<Delivery<'_>> {
        let current = thread::current().id();
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            match state.delivering {
                None => {
                    state.delivering = Some((current, 1));
                    break;
                }
                Some((owner, depth)) if owner == current => {
                    state.delivering = Some((owner, depth + 1));
                    break;
                }
                Some(_) => state = self.wait_idle(state),
            }
        }
        Some(Delivery { notifier: self })
    }

    fn end_delivery(&self) {
        let mut state = self.lock();
        state.delivering = match state.delivering {
            Some((owner, depth)) if depth > 1 => Some((owner, depth - 1)),
            _ => None,
        };
        if state.delivering.is_none() {
            self.idle.notify_all();
        }
    }

    fn wait_idle<'a>(&self, state: MutexGuard<'a, NotifierState>) -> MutexGuard<'a, NotifierState> {
        match self.idle.wait(state) {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Releases the delivery slot, even when a callback panics.
struct Delivery<'a> {
    notifier: &'a Notifier,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.notifier.end_delivery();
    }
}
