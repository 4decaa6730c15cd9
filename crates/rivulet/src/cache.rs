use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RivuletError;
use crate::key::WorkKey;

/// In-flight work for one key. Boxed so producers of any shape share one
/// type, shared so every concurrent caller awaits the same invocation.
pub type ProducerFuture = BoxFuture<'static, Result<Value, RivuletError>>;
pub type SharedProducer = Shared<ProducerFuture>;

/// Lifecycle of one unit of asynchronous work. Transitions are
/// one-directional (`Pending -> Resolved` or `Pending -> Rejected`); an
/// entry is never recreated once settled and never evicted mid-pass.
pub enum CacheEntry {
    Pending(SharedProducer),
    Resolved { value: Value, emitted: bool },
    Rejected(RivuletError),
}

/// Outcome of an atomic lookup-or-start for one work key.
pub enum Lookup {
    /// No entry existed; this caller started the producer.
    Started(SharedProducer),
    /// Work for this key is already in flight; attach, never re-invoke.
    InFlight(SharedProducer),
    Resolved(Value),
    Rejected(RivuletError),
}

/// Pass-scoped store mapping canonical work keys to entry state.
///
/// On the server the whole map is discarded when the pass ends; on the
/// client it lives for the session and acts as a non-invalidating memo.
/// The lock is never held across an await point.
#[derive(Default)]
pub struct SuspenseCache {
    entries: Mutex<FxHashMap<WorkKey, CacheEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub pending_entries: usize,
    pub resolved_entries: usize,
    pub rejected_entries: usize,
    pub emitted_payloads: usize,
}

impl SuspenseCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(FxHashMap::default()) }
    }

    /// Looks up the entry for `key`, creating a `Pending` one when absent.
    ///
    /// The exists-check and the insert happen under one lock so that two
    /// callers racing on the same key observe exactly one producer
    /// invocation. The producer closure only builds the future; it is not
    /// polled here.
    pub fn lookup_or_start<F>(&self, key: &WorkKey, producer: F) -> Lookup
    where
        F: FnOnce() -> ProducerFuture,
    {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(CacheEntry::Pending(shared)) => Lookup::InFlight(shared.clone()),
            Some(CacheEntry::Resolved { value, .. }) => Lookup::Resolved(value.clone()),
            Some(CacheEntry::Rejected(error)) => Lookup::Rejected(error.clone()),
            None => {
                let shared = producer().shared();
                entries.insert(key.clone(), CacheEntry::Pending(shared.clone()));
                Lookup::Started(shared)
            }
        }
    }

    /// Transitions a pending entry to its settled state.
    ///
    /// One-directional: racing waiters all settle with the outcome of the
    /// same shared future, and whoever arrives after the first finds a
    /// non-pending entry and leaves it untouched.
    pub fn settle(&self, key: &WorkKey, outcome: Result<Value, RivuletError>) {
        let mut entries = self.entries.lock();
        let still_pending =
            matches!(entries.get(key), Some(CacheEntry::Pending(_)) | None);
        if still_pending {
            let entry = match outcome {
                Ok(value) => CacheEntry::Resolved { value, emitted: false },
                Err(error) => CacheEntry::Rejected(error),
            };
            entries.insert(key.clone(), entry);
        }
    }

    /// Flips the emitted flag and returns the value exactly once per key;
    /// every later call returns `None`. Rejections never emit.
    pub fn take_emission(&self, key: &WorkKey) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(CacheEntry::Resolved { value, emitted }) if !*emitted => {
                *emitted = true;
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Seeds an already-known value, e.g. one recovered from an injected
    /// payload during hydration. Marked emitted so it is never serialized
    /// again; an existing entry wins over the seed.
    pub fn seed_resolved(&self, key: &WorkKey, value: Value) {
        let mut entries = self.entries.lock();
        entries.entry(key.clone()).or_insert(CacheEntry::Resolved { value, emitted: true });
    }

    /// Settled outcome for `key`, or `None` while pending or absent.
    pub fn get_settled(&self, key: &WorkKey) -> Option<Result<Value, RivuletError>> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(CacheEntry::Resolved { value, .. }) => Some(Ok(value.clone())),
            Some(CacheEntry::Rejected(error)) => Some(Err(error.clone())),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &WorkKey) -> bool {
        matches!(self.entries.lock().get(key), Some(CacheEntry::Pending(_)))
    }

    pub fn contains(&self, key: &WorkKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let mut stats = CacheStats { total_entries: entries.len(), ..CacheStats::default() };
        for entry in entries.values() {
            match entry {
                CacheEntry::Pending(_) => stats.pending_entries += 1,
                CacheEntry::Resolved { emitted, .. } => {
                    stats.resolved_entries += 1;
                    if *emitted {
                        stats.emitted_payloads += 1;
                    }
                }
                CacheEntry::Rejected(_) => stats.rejected_entries += 1,
            }
        }
        stats
    }
}
