//! Engine notification plumbing: completion notifications keyed by item and
//! periodic time observers, both handed out as [`Subscription`] guards.
//!
//! Callbacks are always invoked with no internal lock held, so a callback may
//! freely subscribe, unsubscribe, or drop the player it is observing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Process-unique identity of one player item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    /// Allocates a fresh identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Playback position reported to periodic observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTime {
    pub position: Duration,
    /// `None` until the asset's duration is known.
    pub duration: Option<Duration>,
}

/// Callback for a finished item.
pub type FinishCallback = Arc<dyn Fn(ItemId) + Send + Sync>;

/// Callback for a periodic time tick.
pub type TickCallback = Arc<dyn Fn(PlaybackTime) + Send + Sync>;

/// Keeps an observer registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct CenterInner {
    next_id: u64,
    finished: HashMap<ItemId, Vec<(u64, FinishCallback)>>,
}

/// Delivers "did finish" notifications keyed by item identity.
#[derive(Clone, Default)]
pub struct NotificationCenter {
    inner: Arc<Mutex<CenterInner>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for completion of `item`.
    pub fn observe_finished<F>(&self, item: ItemId, callback: F) -> Subscription
    where
        F: Fn(ItemId) + Send + Sync + 'static,
    {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.finished.entry(item).or_default().push((id, Arc::new(callback)));
                id
            }
            Err(_) => return Subscription::empty(),
        };

        let weak: Weak<Mutex<CenterInner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut inner) = inner.lock() {
                    if let Some(observers) = inner.finished.get_mut(&item) {
                        observers.retain(|(oid, _)| *oid != id);
                        if observers.is_empty() {
                            inner.finished.remove(&item);
                        }
                    }
                }
            }
        })
    }

    /// Notifies every observer of `item`. Returns how many were called.
    pub fn post_finished(&self, item: ItemId) -> usize {
        let callbacks: Vec<FinishCallback> = match self.inner.lock() {
            Ok(inner) => inner
                .finished
                .get(&item)
                .map(|observers| observers.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        tracing::debug!("Posting finished for {} to {} observer(s)", item, callbacks.len());
        for callback in &callbacks {
            callback(item);
        }
        callbacks.len()
    }

    /// Number of observers registered for `item`.
    pub fn observer_count(&self, item: ItemId) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.finished.get(&item).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

struct PeriodicObserver {
    id: u64,
    interval: Duration,
    next_due: Duration,
    callback: TickCallback,
}

#[derive(Default)]
struct PeriodicInner {
    next_id: u64,
    observers: Vec<PeriodicObserver>,
}

/// Periodic time observers attached to one player.
///
/// The owning engine decides the clock: it passes its current time to
/// [`PeriodicObservers::add`] and [`PeriodicObservers::fire_due`].
#[derive(Clone, Default)]
pub struct PeriodicObservers {
    inner: Arc<Mutex<PeriodicInner>>,
}

impl PeriodicObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` to run every `interval`, first due at `now + interval`.
    pub fn add(&self, now: Duration, interval: Duration, callback: TickCallback) -> Subscription {
        let interval = interval.max(Duration::from_millis(1));
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.observers.push(PeriodicObserver {
                    id,
                    interval,
                    next_due: now + interval,
                    callback,
                });
                id
            }
            Err(_) => return Subscription::empty(),
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut inner) = inner.lock() {
                    inner.observers.retain(|o| o.id != id);
                }
            }
        })
    }

    /// Fires every observer whose deadline has passed, at most once each.
    pub fn fire_due(&self, now: Duration, time: PlaybackTime) -> usize {
        let due: Vec<TickCallback> = match self.inner.lock() {
            Ok(mut inner) => inner
                .observers
                .iter_mut()
                .filter(|o| now >= o.next_due)
                .map(|o| {
                    while o.next_due <= now {
                        o.next_due += o.interval;
                    }
                    Arc::clone(&o.callback)
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        for callback in &due {
            callback(time);
        }
        due.len()
    }

    /// Restarts every observer's cadence from `now`.
    pub fn rebase(&self, now: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            for observer in inner.observers.iter_mut() {
                observer.next_due = now + observer.interval;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.observers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
