//! Ordered subscriber lists
//!
//! Callbacks run synchronously, in subscription order, outside the list lock
//! so a callback may subscribe or unsubscribe without deadlocking.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by every `advise`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubscriberList<T> {
    next: u64,
    entries: Vec<(SubscriptionId, Callback<T>)>,
}

pub struct Subscribers<T> {
    inner: Mutex<SubscriberList<T>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Subscribers {
            inner: Mutex::new(SubscriberList {
                next: 1,
                entries: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut list = self.inner.lock();
        let id = SubscriptionId(list.next);
        list.next += 1;
        list.entries.push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.inner.lock();
        let before = list.entries.len();
        list.entries.retain(|(sid, _)| *sid != id);
        list.entries.len() != before
    }

    /// Deliver to every current subscriber
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    /// Deliver to a single subscriber, if still present
    pub fn notify_one(&self, id: SubscriptionId, value: &T) {
        let callback = self
            .inner
            .lock()
            .entries
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, cb)| cb.clone());
        if let Some(callback) = callback {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}
