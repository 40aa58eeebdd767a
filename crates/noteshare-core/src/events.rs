//! Callback registry for inbound updates and connection status.
//!
//! `EventBus` hands out a `Subscription` per registered callback. The
//! subscription is the callback's identity: dropping it (or calling
//! `unsubscribe`) removes exactly that callback and no other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to stop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Subscription {
    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Event bus publishing events of type `E` to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. Returns a `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { bus: weak, id }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: &E) {
        // Clone the list so a callback may subscribe/unsubscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E: 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // emit releases its read lock before running callbacks, so this only waits
        // for the list copy
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_emit() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let total = Arc::new(AtomicUsize::new(0));
        let total_clone = Arc::clone(&total);

        let _sub = bus.subscribe(move |value| {
            total_clone.fetch_add(*value as usize, Ordering::Relaxed);
        });

        bus.emit(&3);
        bus.emit(&4);
        assert_eq!(total.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_callback() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count1);
        let c2 = Arc::clone(&count2);
        let sub1 = bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            c2.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(&());
        sub1.unsubscribe();
        bus.emit(&());

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let sub = bus.subscribe(|_| {});
        drop(bus);
        // Must not panic when the bus is already gone
        drop(sub);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        let held = Arc::new(std::sync::Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);

        let _sub = bus.subscribe(move |_| {
            let sub = inner_bus.subscribe(|_| {});
            held_clone.lock().unwrap().push(sub);
        });

        bus.emit(&());
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe_waits_for_concurrent_reader() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let sub = bus.subscribe(|_| {});

        let reader = bus.callbacks.read().unwrap();
        let dropper = std::thread::spawn(move || drop(sub));
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(reader);
        dropper.join().unwrap();

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself_during_emit() {
        let bus: Arc<EventBus<()>> = Arc::new(EventBus::new());
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::default();
        let slot_clone = Arc::clone(&slot);

        let sub = bus.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(&());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
