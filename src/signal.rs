//! Plain observable state without a framework: a [`Signal`] holds a value and
//! a subscriber list, an [`Emitter`] is the value-less variant for one-shot
//! events. Listeners run synchronously on the calling thread, so a read right
//! after a write always observes the new state.
//!
//! Subscriptions are RAII guards; dropping one detaches the listener. The
//! dispatch path clones the listener handles out of the lock before calling
//! them, so a listener may freely read the signal or register further
//! subscriptions.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    entries: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(&self, listener: Listener<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(entry_id, _)| *entry_id != id);
    }

    fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

/// Detaches its listener when dropped.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Keep the listener attached for the rest of the process lifetime.
    pub fn forget(mut self) {
        self.detach = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// Observable state holder: `get`, `set`, `subscribe`.
pub struct Signal<T> {
    value: RwLock<T>,
    listeners: Arc<Listeners<T>>,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial),
            listeners: Arc::new(Listeners::new()),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replaces the value and synchronously notifies every subscriber.
    pub fn set(&self, value: T) {
        *self.value.write() = value.clone();
        self.listeners.notify(&value);
    }

    /// Registers a listener called on every `set`. The listener stays attached
    /// until the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.add(Arc::new(listener));
        let weak: Weak<Listeners<T>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.remove(id);
            }
        })
    }
}

/// Value-less event channel with the same subscription semantics as
/// [`Signal`]. Used for signals that have no meaningful "current value",
/// such as session invalidation.
pub struct Emitter<E> {
    listeners: Arc<Listeners<E>>,
}

impl<E: Send + Sync + 'static> Emitter<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners::new()),
        }
    }

    pub fn emit(&self, event: &E) {
        self.listeners.notify(event);
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.add(Arc::new(listener));
        let weak: Weak<Listeners<E>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.remove(id);
            }
        })
    }
}

impl<E: Send + Sync + 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_notifies_subscribers_synchronously() {
        let signal = Signal::new(0u32);
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = Arc::clone(&seen);
        let _sub = signal.subscribe(move |value| {
            seen_clone.store(*value as usize, Ordering::SeqCst);
        });

        signal.set(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(signal.get(), 7);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let signal = Signal::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let sub = signal.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.set(1);
        drop(sub);
        signal.set(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_read_the_signal_it_observes() {
        let signal = Arc::new(Signal::new(0u32));
        let observed = Arc::new(AtomicUsize::new(0));

        let signal_clone = Arc::clone(&signal);
        let observed_clone = Arc::clone(&observed);
        let _sub = signal.subscribe(move |_| {
            observed_clone.store(signal_clone.get() as usize, Ordering::SeqCst);
        });

        signal.set(3);
        assert_eq!(observed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn emitter_delivers_to_every_subscriber() {
        let emitter: Emitter<String> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&count);
        let _a = emitter.subscribe(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&count);
        let _b = emitter.subscribe(move |_| {
            second.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&"hello".to_string());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
