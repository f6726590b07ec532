//! Externally owned, observable state cells.
//!
//! A [`Binding`] stands in for a UI framework's bound state: the view owns
//! it, the sound binding reads and writes it, and anyone may watch it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Watcher<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BindingInner<T> {
    value: Mutex<T>,
    watchers: Mutex<Vec<(u64, Watcher<T>)>>,
    next_watcher: AtomicU64,
}

/// Shared read-write state cell. Clones refer to the same value.
pub struct Binding<T> {
    inner: Arc<BindingInner<T>>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Binding<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                value: Mutex::new(value),
                watchers: Mutex::new(Vec::new()),
                next_watcher: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        match self.inner.value.lock() {
            Ok(value) => value.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stores `value`. Watchers run only if the value changed, after the
    /// cell's locks are released. Returns whether it changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = match self.inner.value.lock() {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        let watchers: Vec<Watcher<T>> = self
            .inner
            .watchers
            .lock()
            .map(|w| w.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for watcher in watchers {
            watcher(&value);
        }
        true
    }

    /// Calls `f` with each new value until the returned guard is dropped.
    pub fn watch<F>(&self, f: F) -> WatchGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut watchers) = self.inner.watchers.lock() {
            watchers.push((id, Arc::new(f)));
        }

        let weak = Arc::downgrade(&self.inner);
        WatchGuard {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut watchers) = inner.watchers.lock() {
                        watchers.retain(|(wid, _)| *wid != id);
                    }
                }
            })),
        }
    }

    /// True if both bindings refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + PartialEq + Send + Default + 'static> Default for Binding<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + Send + fmt::Debug + 'static> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Binding").field(&self.get()).finish()
    }
}

/// Keeps a watcher registered; dropping it stops notifications.
#[must_use = "dropping a WatchGuard immediately stops watching"]
pub struct WatchGuard {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_value() {
        let a = Binding::new(false);
        let b = a.clone();
        b.set(true);
        assert!(a.get());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Binding::new(true)));
    }

    #[test]
    fn test_watchers_see_changes_only() {
        let binding = Binding::new(0.0_f64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = binding.watch(move |v| sink.lock().unwrap().push(*v));

        assert!(binding.set(1.5));
        assert!(!binding.set(1.5));
        assert!(binding.set(2.0));
        assert_eq!(*seen.lock().unwrap(), vec![1.5, 2.0]);
    }

    #[test]
    fn test_dropping_guard_stops_watching() {
        let binding = Binding::new(false);
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let guard = binding.watch(move |_| *sink.lock().unwrap() += 1);

        binding.set(true);
        drop(guard);
        binding.set(false);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_watcher_may_write_back() {
        let binding = Binding::new(0_u32);
        let target = binding.clone();
        let _guard = binding.watch(move |v| {
            if *v == 1 {
                target.set(2);
            }
        });

        binding.set(1);
        assert_eq!(binding.get(), 2);
    }
}
