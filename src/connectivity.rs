//! Network reachability signal.
//!
//! The platform pushes reachability changes in through
//! [`ConnectivityMonitor::set_connected`]; interested parties register a callback
//! with [`ConnectivityMonitor::subscribe`] and keep the returned [`Subscription`]
//! alive for as long as they want to be notified.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info};

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    connected: AtomicBool,
    subscribers: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

/// Live boolean of network reachability.
///
/// Starts out connected until the platform says otherwise. Clones share the
/// same state and subscriber list.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(true),
                subscribers: Mutex::new(Subscribers::default()),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Records a reachability report from the platform.
    ///
    /// Subscribers are only called when the value actually changes. Callbacks
    /// run on the calling thread, outside the subscriber lock.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.inner.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            debug!("Connectivity unchanged ({connected})");
            return;
        }

        info!("Connectivity changed: connected={connected}");

        let callbacks: Vec<Callback> = match self.inner.subscribers.lock() {
            Ok(subs) => subs.callbacks.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().callbacks.values().cloned().collect(),
        };

        for callback in callbacks {
            callback(connected);
        }
    }

    /// Registers `callback` to be invoked with the new value on every change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut subs = match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.insert(id, Arc::new(callback));

        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.lock() {
            Ok(subs) => subs.callbacks.len(),
            Err(poisoned) => poisoned.into_inner().callbacks.len(),
        }
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            let mut subs = match inner.subscribers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subs.callbacks.remove(&self.id);
        }
    }
}
