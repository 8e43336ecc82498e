//! Observer registry
//!
//! Subscribers are called in subscription order. `notify` iterates a snapshot,
//! so subscribing or unsubscribing from inside a callback affects only later
//! notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback<E>)>,
}

pub struct Observers<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }
}

impl<E> std::fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut inner = self.inner();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .inner()
            .subscribers
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_subscription_order() {
        let observers = Observers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            observers.subscribe(move |e| seen.lock().unwrap().push((tag, *e)));
        }
        observers.notify(&7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let observers = Observers::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_during_notify_uses_snapshot() {
        let observers = Arc::new(Observers::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let second_id = Arc::new(Mutex::new(None));

        let obs = Arc::clone(&observers);
        let sid = Arc::clone(&second_id);
        observers.subscribe(move |_| {
            if let Some(id) = *sid.lock().unwrap() {
                obs.unsubscribe(id);
            }
        });
        let c = Arc::clone(&count);
        let id = observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        *second_id.lock().unwrap() = Some(id);

        observers.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        observers.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 1);
    }
}
