use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

use crate::cache::{Lookup, SharedProducer, SuspenseCache};
use crate::error::RivuletError;
use crate::key::WorkKey;
use crate::payload::InjectedPayload;
use crate::sink::StreamSink;

/// Per-render-pass context threaded to every component activation.
///
/// Created at pass start, dropped at pass end; concurrent passes each get
/// their own, so cache state and stream output never leak across requests.
/// Cheap to clone: handles share one cache and one sink.
#[derive(Clone)]
pub struct RenderPass {
    cache: Arc<SuspenseCache>,
    sink: Option<StreamSink>,
}

/// What the rendering engine sees when a component requests a value.
pub enum Suspension {
    /// The value is available now; render with it.
    Ready(Value),
    /// Work is in flight. Await the handle, then re-invoke the component;
    /// the same call returns `Ready` synchronously on the second pass.
    Suspended(Resume),
}

/// Awaitable handed to the engine for a suspended frame.
///
/// Completes only after the producer settled, the cache entry transitioned,
/// and the payload (if any) was appended to the stream, so a resumed frame
/// always observes a settled entry and the client can never race an
/// unwritten payload.
pub struct Resume {
    inner: BoxFuture<'static, ()>,
}

impl Future for Resume {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl RenderPass {
    /// Pass with an active stream: resolved values are injected into the
    /// still-flowing output as they settle.
    pub fn streaming(sink: StreamSink) -> Self {
        Self { cache: Arc::new(SuspenseCache::new()), sink: Some(sink) }
    }

    /// Pass without a stream (streaming disabled for SEO, or client-side
    /// execution). Same cache semantics, no payload emission; output is
    /// delivered by a single final writer instead.
    pub fn buffered() -> Self {
        Self { cache: Arc::new(SuspenseCache::new()), sink: None }
    }

    pub fn streaming_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn cache(&self) -> &SuspenseCache {
        &self.cache
    }

    pub fn sink(&self) -> Option<&StreamSink> {
        self.sink.as_ref()
    }

    /// Requests the value for `caller_key` (or, unkeyed, for this element's
    /// identity), starting `producer` only if no entry exists yet.
    ///
    /// Callable re-entrantly any number of times per pass for the same or
    /// different keys: a pending entry attaches instead of re-invoking, a
    /// resolved entry returns synchronously and emits its payload on first
    /// access only, a rejected entry re-raises the stored failure.
    pub fn resolve<F, Fut>(
        &self,
        caller_key: Option<&Value>,
        element_id: &str,
        producer: F,
    ) -> Result<Suspension, RivuletError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, RivuletError>> + Send + 'static,
    {
        let key = WorkKey::derive(caller_key, element_id)?;
        match self.cache.lookup_or_start(&key, || producer().boxed()) {
            Lookup::Resolved(value) => {
                emit_if_first(&self.cache, self.sink.as_ref(), &key, element_id);
                Ok(Suspension::Ready(value))
            }
            Lookup::Rejected(error) => Err(error),
            Lookup::Started(shared) => {
                debug!("started producer for {key}");
                self.spawn_completion_driver(&key, element_id, shared.clone());
                Ok(Suspension::Suspended(self.resume_after(key, element_id, shared)))
            }
            Lookup::InFlight(shared) => {
                Ok(Suspension::Suspended(self.resume_after(key, element_id, shared)))
            }
        }
    }

    /// Await-through convenience over [`resolve`](Self::resolve): suspends
    /// and resumes internally and returns the settled value.
    pub async fn resolve_value<F, Fut>(
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
        match self.resolve(caller_key, element_id, producer)? {
            Suspension::Ready(value) => Ok(value),
            Suspension::Suspended(resume) => {
                resume.await;
                // Re-entry after resumption: the entry has settled.
                match self.cache.get_settled(&key) {
                    Some(outcome) => outcome,
                    None => Err(RivuletError::producer("producer settled without an outcome")),
                }
            }
        }
    }

    fn resume_after(&self, key: WorkKey, element_id: &str, shared: SharedProducer) -> Resume {
        let cache = Arc::clone(&self.cache);
        let sink = self.sink.clone();
        let element_id = element_id.to_string();
        Resume {
            inner: async move {
                let outcome = shared.await;
                cache.settle(&key, outcome);
                emit_if_first(&cache, sink.as_ref(), &key, &element_id);
            }
            .boxed(),
        }
    }

    /// Drives a started producer to completion even when every consuming
    /// frame is abandoned. Outside a runtime the attached waiters drive it
    /// instead.
    fn spawn_completion_driver(&self, key: &WorkKey, element_id: &str, shared: SharedProducer) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cache = Arc::clone(&self.cache);
            let sink = self.sink.clone();
            let key = key.clone();
            let element_id = element_id.to_string();
            handle.spawn(async move {
                let outcome = shared.await;
                cache.settle(&key, outcome);
                emit_if_first(&cache, sink.as_ref(), &key, &element_id);
            });
        }
    }
}

/// Emits the payload for `key` if a sink is present and the key has not
/// emitted yet. The emitted flag flips under the cache lock; the append
/// itself happens after, ordering is the sink's FIFO guarantee.
fn emit_if_first(
    cache: &SuspenseCache,
    sink: Option<&StreamSink>,
    key: &WorkKey,
    element_id: &str,
) {
    let Some(sink) = sink else { return };
    if let Some(value) = cache.take_emission(key) {
        sink.emit_payload(&InjectedPayload::new(key.as_str(), element_id, value));
    }
}
