//! Synchronous publish/subscribe hub
//!
//! [`EventBus`] keeps one listener list per event name plus a list of
//! wildcard listeners. Publishing runs, in registration order, every listener
//! of that event and then every wildcard listener, all on the publishing
//! thread.
//!
//! Listeners are isolated from each other: a panicking handler is logged and
//! the remaining handlers of the same publish call still run. Handler lists are
//! snapshotted before dispatch, so subscribing or unsubscribing from inside a
//! handler is safe and only affects later publishes.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, warn};

/// Default per-event listener count above which a warning is logged
pub const DEFAULT_MAX_LISTENERS: usize = 100;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type AnyHandler<E> = Arc<dyn Fn(&str, &E) + Send + Sync>;

struct Listener<E> {
    id: u64,
    once: bool,
    handler: Handler<E>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct AnyListener<E> {
    id: u64,
    handler: AnyHandler<E>,
}

impl<E> Clone for AnyListener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct Registry<E> {
    by_event: HashMap<String, Vec<Listener<E>>>,
    any: Vec<AnyListener<E>>,
}

struct Inner<E> {
    registry: Mutex<Registry<E>>,
    next_id: AtomicU64,
    max_listeners: usize,
}

impl<E> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        // Handlers never run under this lock, so poisoning cannot leave the
        // lists half-updated.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, event: Option<&str>, id: u64) -> bool {
        let mut registry = self.lock();
        match event {
            Some(name) => {
                let Some(listeners) = registry.by_event.get_mut(name) else {
                    return false;
                };
                let before = listeners.len();
                listeners.retain(|l| l.id != id);
                let removed = listeners.len() != before;
                if listeners.is_empty() {
                    registry.by_event.remove(name);
                }
                removed
            }
            None => {
                let before = registry.any.len();
                registry.any.retain(|l| l.id != id);
                registry.any.len() != before
            }
        }
    }
}

/// Generic publish/subscribe hub (cheap to clone, clones share listeners)
pub struct EventBus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }
}

impl<E: 'static> EventBus<E> {
    /// Create a bus warning once an event has more than `max_listeners` listeners
    pub fn new(max_listeners: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    by_event: HashMap::new(),
                    any: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
                max_listeners,
            }),
        }
    }

    /// Listen to every publish of `event`
    pub fn subscribe(
        &self,
        event: &str,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(event, false, Arc::new(handler))
    }

    /// Listen to the next publish of `event` only
    ///
    /// The listener is removed before it runs, so it is gone even if it panics.
    pub fn subscribe_once(
        &self,
        event: &str,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(event, true, Arc::new(handler))
    }

    /// Listen to every event; the handler also receives the event name
    pub fn subscribe_any(
        &self,
        handler: impl Fn(&str, &E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().any.push(AnyListener {
            id,
            handler: Arc::new(handler),
        });
        self.subscription(None, id)
    }

    /// Deliver `payload` to the listeners of `event`, then to wildcard listeners
    ///
    /// Returns whether at least one handler ran.
    pub fn publish(&self, event: &str, payload: &E) -> bool {
        let (listeners, any) = {
            let mut registry = self.inner.lock();
            let listeners = registry.by_event.get(event).cloned().unwrap_or_default();
            if listeners.iter().any(|l| l.once)
                && let Some(current) = registry.by_event.get_mut(event)
            {
                current.retain(|l| !l.once);
                if current.is_empty() {
                    registry.by_event.remove(event);
                }
            }
            (listeners, registry.any.clone())
        };

        for listener in &listeners {
            let handler = &listener.handler;
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                error!(event, listener = listener.id, "event handler panicked");
            }
        }
        for listener in &any {
            let handler = &listener.handler;
            if catch_unwind(AssertUnwindSafe(|| handler(event, payload))).is_err() {
                error!(event, listener = listener.id, "wildcard event handler panicked");
            }
        }

        !listeners.is_empty() || !any.is_empty()
    }

    /// Number of listeners registered for `event` (wildcards excluded)
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.lock().by_event.get(event).map_or(0, Vec::len)
    }

    /// Number of wildcard listeners
    pub fn any_listener_count(&self) -> usize {
        self.inner.lock().any.len()
    }

    fn add(&self, event: &str, once: bool, handler: Handler<E>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut registry = self.inner.lock();
            let listeners = registry.by_event.entry(event.to_string()).or_default();
            listeners.push(Listener { id, once, handler });
            listeners.len()
        };
        if count > self.inner.max_listeners {
            warn!(
                event,
                count,
                max_listeners = self.inner.max_listeners,
                "possible listener leak: too many listeners for one event"
            );
        }
        self.subscription(Some(event.to_string()), id)
    }

    fn subscription(&self, event: Option<String>, id: u64) -> Subscription {
        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Box::new(move || {
                weak.upgrade()
                    .is_some_and(|inner| inner.remove(event.as_deref(), id))
            }),
        }
    }
}

/// Handle returned by every subscribe call
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    remove: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Subscription {
    /// Remove the listener; returns false if it was already gone
    ///
    /// Safe to call from inside a handler and more than once.
    pub fn unsubscribe(&self) -> bool {
        (self.remove)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
