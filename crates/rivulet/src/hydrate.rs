use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::future::Future;
use tracing::debug;

use crate::error::RivuletError;
use crate::key::WorkKey;
use crate::pass::RenderPass;
use crate::payload::extract_payloads;

/// Client-side mirror of the render pass.
///
/// Scans the materialized document once for injected payloads, then serves
/// them synchronously by identity. Keys without a payload (pure client-side
/// render, or a server-side rejection that never emitted) fall back to a
/// session-scoped memoizing resolution: the producer runs at most once per
/// key for the lifetime of the reader, so remounts never refetch.
pub struct HydrationReader {
    payloads: Mutex<FxHashMap<String, Value>>,
    session: RenderPass,
}

impl HydrationReader {
    /// Reader with no server-injected payloads; every read computes.
    pub fn new() -> Self {
        Self { payloads: Mutex::new(FxHashMap::default()), session: RenderPass::buffered() }
    }

    /// Scans `document` for every payload block. The first payload for a key
    /// wins; the server emits at most one per key, so duplicates indicate a
    /// stitched or replayed document and are ignored.
    pub fn from_document(document: &str) -> Self {
        let mut payloads = FxHashMap::default();
        for payload in extract_payloads(document) {
            payloads.entry(payload.key).or_insert(payload.value);
        }
        debug!("hydration reader found {} injected payloads", payloads.len());
        Self { payloads: Mutex::new(payloads), session: RenderPass::buffered() }
    }

    /// Number of injected payloads not yet consumed by a read.
    pub fn pending_payloads(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Returns the value for this identity: the injected payload when the
    /// server already computed it, otherwise the session cache, otherwise a
    /// fresh `producer` run.
    ///
    /// A consumed payload is removed and seeded into the session cache, so a
    /// component that legitimately re-runs gets the cached value rather than
    /// rehydrating a stale block.
    pub async fn read<F, Fut>(
        &self,
        caller_key: Option<&Value>,
        element_id: &str,
        producer: F,
    ) -> Result<Value, RivuletError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, RivuletError>> + Send + 'static,
    {
        let key = WorkKey::derive(caller_key, element_id)?;

        let injected = self.payloads.lock().remove(key.as_str());
        if let Some(value) = injected {
            self.session.cache().seed_resolved(&key, value.clone());
            return Ok(value);
        }

        self.session.resolve_value(caller_key, element_id, producer).await
    }
}

impl Default for HydrationReader {
    fn default() -> Self {
        Self::new()
    }
}
