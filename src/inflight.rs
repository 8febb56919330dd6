use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use reqwest::Method;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub(crate) struct InFlightEntry {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) cancel: CancellationToken,
}

/// Requests currently being dispatched, with their cancellation handles.
#[derive(Default)]
pub(crate) struct InFlightRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, InFlightEntry>>,
}

impl InFlightRegistry {
    /// Register an attempt. The entry is removed when the guard drops.
    pub(crate) fn register(self: &Arc<Self>, entry: InFlightEntry) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, entry);
        InFlightGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Cancel every registered attempt. Entries stay until each one settles.
    pub(crate) fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> =
            self.lock().values().map(|entry| entry.cancel.clone()).collect();
        #[cfg(feature = "tracing")]
        tracing::debug!(count = tokens.len(), "cancelling in-flight requests");
        for token in tokens {
            token.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<InFlightEntry> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, InFlightEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> (InFlightEntry, CancellationToken) {
        let token = CancellationToken::new();
        (
            InFlightEntry {
                method: Method::GET,
                url: url.to_string(),
                cancel: token.clone(),
            },
            token,
        )
    }

    #[test]
    fn guard_removes_entry_exactly_once() {
        let registry = Arc::new(InFlightRegistry::default());
        let (a, _) = entry("/a");
        let (b, _) = entry("/b");
        let guard_a = registry.register(a);
        let _guard_b = registry.register(b);
        assert_eq!(registry.len(), 2);

        drop(guard_a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].url, "/b");
    }

    #[test]
    fn cancel_all_fires_tokens_but_keeps_entries() {
        let registry = Arc::new(InFlightRegistry::default());
        let (a, token_a) = entry("/a");
        let (b, token_b) = entry("/b");
        let _ga = registry.register(a);
        let _gb = registry.register(b);

        registry.cancel_all();
        assert!(token_a.is_cancelled());
        assert!(token_b.is_cancelled());
        assert_eq!(registry.len(), 2);
    }
}
