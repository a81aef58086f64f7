// Typed observer registry
// Each component instance owns its own handler table; there is no global
// event registry shared between instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token returned by `on`, used to unsubscribe with `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscription list for one event type.
///
/// Handlers are invoked synchronously, in registration order, on whatever
/// task emits the event. The handler list is cloned out of the lock before
/// dispatch so a handler may subscribe/unsubscribe without deadlocking.
pub struct EventHandlers<E> {
    handlers: Mutex<Vec<(HandlerId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> EventHandlers<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler; returns a token for `off`.
    pub fn on(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("event handler table poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if the token was already removed.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().expect("event handler table poisoned");
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Invoke every registered handler with the event.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .expect("event handler table poisoned")
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        Self::new()
    }
}
