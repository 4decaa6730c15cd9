use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::RivuletError;

/// Marker class carried by every injected block so client code can select
/// all payloads from the document with a stable class match, no full parse.
pub const PAYLOAD_MARKER_CLASS: &str = "__rivulet_payload";

const BLOCK_OPEN: &str = "<script type=\"application/json\" class=\"__rivulet_payload\">";
const BLOCK_CLOSE: &str = "</script>";

/// One resolved value embedded in the output stream for later client
/// consumption. Self-describing: the canonical work key, the element id that
/// triggered the emission, and the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedPayload {
    pub key: String,
    #[serde(rename = "elementId")]
    pub element_id: String,
    pub value: Value,
}

impl InjectedPayload {
    pub fn new(
        key: impl Into<String>,
        element_id: impl Into<String>,
        value: Value,
    ) -> Self {
        Self { key: key.into(), element_id: element_id.into(), value }
    }

    /// Serializes the payload into an inline, non-rendering script block.
    pub fn encode(&self) -> Result<String, RivuletError> {
        let body = serde_json::to_string(self)?;
        Ok(format!("{BLOCK_OPEN}{}{BLOCK_CLOSE}", escape_inline_json(&body)))
    }

    pub fn decode(body: &str) -> Result<Self, RivuletError> {
        serde_json::from_str(body).map_err(|e| RivuletError::payload_decode(e.to_string()))
    }
}

/// Escapes characters that could terminate the surrounding script element or
/// break the document when the JSON text is embedded verbatim. Inside JSON
/// these characters only occur within string literals, and JSON decoders
/// reverse `\uXXXX` escapes natively, so decoding needs no counterpart.
pub fn escape_inline_json(body: &str) -> String {
    let mut escaped = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Scans an already-materialized document for every injected payload block.
///
/// Malformed bodies are skipped with a warning; well-formed blocks after a
/// malformed one are still returned.
pub fn extract_payloads(document: &str) -> Vec<InjectedPayload> {
    let mut found = Vec::new();
    let mut rest = document;

    while let Some(start) = rest.find(BLOCK_OPEN) {
        let after_open = &rest[start + BLOCK_OPEN.len()..];
        let Some(end) = after_open.find(BLOCK_CLOSE) else {
            warn!("unterminated payload block; stopping document scan");
            break;
        };

        match InjectedPayload::decode(&after_open[..end]) {
            Ok(payload) => found.push(payload),
            Err(e) => warn!("skipping malformed payload block: {e}"),
        }

        rest = &after_open[end + BLOCK_CLOSE.len()..];
    }

    found
}
