//! Subscription handles linking a bridged backend call to its RPC.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Live link between a backend call and the bridge consuming it.
///
/// Released exactly once. Clones share the same state, so the bridge task and
/// the server can both hold one; whichever calls [`Subscription::release`]
/// first wins and later calls are no-ops.
#[derive(Clone, Debug, Default)]
pub struct Subscription {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    released: AtomicBool,
    notify: Notify,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the subscription. Returns `true` only for the call that
    /// actually performed the release.
    pub fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Resolves once the subscription has been released.
    pub async fn released(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flag so a concurrent
            // release cannot slip between the check and the wait.
            notified.as_mut().enable();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// Set of subscriptions belonging to in-flight RPCs.
///
/// Released entries are pruned lazily on every insert.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    live: Mutex<Vec<Subscription>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, subscription: &Subscription) {
        let mut live = self.live.lock();
        live.retain(|s| !s.is_released());
        live.push(subscription.clone());
    }

    /// Number of subscriptions that are still live.
    pub fn live_count(&self) -> usize {
        let mut live = self.live.lock();
        live.retain(|s| !s.is_released());
        live.len()
    }

    /// Release every tracked subscription. Returns how many were released by
    /// this call.
    pub fn release_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.live.lock());
        drained.iter().filter(|s| s.release()).count()
    }
}
