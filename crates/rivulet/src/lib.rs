//! Suspense bridge for streaming server rendering.
//!
//! A render pass suspends on asynchronous work while output keeps flowing:
//! a pass-scoped cache deduplicates concurrent requests by canonical key and
//! guarantees each producer runs at most once per pass, a suspension adapter
//! pauses and resumes individual rendering frames around pending work, and
//! resolved values are injected into the still-flowing stream as inline
//! payload blocks a client-side reader later decodes instead of recomputing
//! them during hydration.

pub mod cache;
pub mod error;
pub mod hydrate;
pub mod key;
pub mod pass;
pub mod payload;
pub mod sink;

pub use cache::{CacheEntry, CacheStats, Lookup, SuspenseCache};
pub use error::RivuletError;
pub use hydrate::HydrationReader;
pub use key::{IdentitySource, SequentialIds, WorkKey, canonicalize, normalize};
pub use pass::{RenderPass, Resume, Suspension};
pub use payload::{InjectedPayload, PAYLOAD_MARKER_CLASS, extract_payloads};
pub use sink::{SinkStream, StreamSink};
