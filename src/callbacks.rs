//! Ordered, identity-deduplicated hook registries.
//!
//! One registry type backs the pre-flight, post-flight and error hooks of a
//! [`Requester`](crate::Requester). Entries are `Arc`s; registering the same
//! `Arc` twice keeps a single entry, so a hook never runs twice per batch.
//!
//! Dispatch always iterates a [`snapshot`](CallbackRegistry::snapshot) taken
//! when the batch begins. Adding or removing entries while a batch runs only
//! affects later batches.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

type Entries<F> = Mutex<Vec<Arc<F>>>;

pub struct CallbackRegistry<F: ?Sized> {
    entries: Arc<Entries<F>>,
}

impl<F: ?Sized> Default for CallbackRegistry<F> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<F: ?Sized> fmt::Debug for CallbackRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &lock(&self.entries).len())
            .finish()
    }
}

impl<F> CallbackRegistry<F>
where
    F: ?Sized + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` unless that same `Arc` is already registered.
    pub fn add_shared(&self, callback: Arc<F>) -> Disposer {
        {
            let mut entries = lock(&self.entries);
            if !entries.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
                entries.push(callback.clone());
            }
        }
        let weak: Weak<Entries<F>> = Arc::downgrade(&self.entries);
        Disposer::new(move || {
            if let Some(entries) = weak.upgrade() {
                lock(&entries).retain(|existing| !Arc::ptr_eq(existing, &callback));
            }
        })
    }

    /// Remove by identity. No-op if absent.
    pub fn remove(&self, callback: &Arc<F>) {
        lock(&self.entries).retain(|existing| !Arc::ptr_eq(existing, callback));
    }

    /// Entries in insertion order at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        lock(&self.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a registered callback when [`dispose`](Disposer::dispose)d.
///
/// Dropping a disposer without calling `dispose` leaves the callback registered.
#[must_use = "dropping a Disposer keeps the callback registered; call dispose() to remove it"]
pub struct Disposer {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Disposer {
    fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn dispose(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("pending", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Hook = dyn Fn(&mut Vec<&'static str>) + Send + Sync;

    fn hook(label: &'static str) -> Arc<Hook> {
        Arc::new(move |out: &mut Vec<&'static str>| out.push(label))
    }

    fn run(registry: &CallbackRegistry<Hook>) -> Vec<&'static str> {
        let mut out = Vec::new();
        for cb in registry.snapshot() {
            cb(&mut out);
        }
        out
    }

    #[test]
    fn debug_reports_entry_count() {
        let registry: CallbackRegistry<Hook> = CallbackRegistry::new();
        let _ = registry.add_shared(hook("a"));
        assert_eq!(format!("{registry:?}"), "CallbackRegistry { len: 1 }");
    }

    #[test]
    fn invokes_in_insertion_order() {
        let registry = CallbackRegistry::<Hook>::new();
        let _a = registry.add_shared(hook("a"));
        let _b = registry.add_shared(hook("b"));
        let _c = registry.add_shared(hook("c"));
        assert_eq!(run(&registry), vec!["a", "b", "c"]);
    }

    #[test]
    fn same_arc_is_registered_once() {
        let registry = CallbackRegistry::<Hook>::new();
        let shared = hook("once");
        let _first = registry.add_shared(shared.clone());
        let _second = registry.add_shared(shared.clone());
        assert_eq!(registry.len(), 1);
        assert_eq!(run(&registry), vec!["once"]);
    }

    #[test]
    fn disposer_and_remove_delete_by_identity() {
        let registry = CallbackRegistry::<Hook>::new();
        let a = hook("a");
        let b = hook("b");
        let dispose_a = registry.add_shared(a.clone());
        let _b = registry.add_shared(b.clone());

        dispose_a.dispose();
        assert_eq!(run(&registry), vec!["b"]);

        registry.remove(&b);
        registry.remove(&b);
        assert!(registry.is_empty());
    }

    #[test]
    fn disposing_after_registry_drop_is_a_noop() {
        let registry = CallbackRegistry::<Hook>::new();
        let disposer = registry.add_shared(hook("a"));
        drop(registry);
        disposer.dispose();
    }

    #[test]
    fn mutation_during_iteration_does_not_rerun_callbacks() {
        let registry = Arc::new(CallbackRegistry::<dyn Fn() + Send + Sync>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_registry = registry.clone();
        let inner_calls = calls.clone();
        let _adder = registry.add_shared(Arc::new(move || {
            inner_calls.fetch_add(1, Ordering::SeqCst);
            let counter = inner_calls.clone();
            let _ = inner_registry.add_shared(Arc::new(move || {
                counter.fetch_add(100, Ordering::SeqCst);
            }));
        }));

        for cb in registry.snapshot() {
            cb();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 2);
    }
}
