//! Refresh notifications.
//!
//! A [`Signal`] is a list of listeners invoked synchronously on [`Signal::emit`].
//! There is no payload; listeners only learn that a refresh happened and
//! query the emitter for whatever they need.

use parking_lot::Mutex;
use std::sync::Arc;

/// Handle returned by [`Signal::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct Signal {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: Mutex<u64>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            ListenerId(*next)
        };
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener, returning whether it was connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Call every listener in connection order.
    ///
    /// The listener list is snapshotted first, so listeners may connect or
    /// disconnect from inside a callback.
    pub fn emit(&self) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener();
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
