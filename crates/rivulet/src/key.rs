use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RivuletError;

/// Canonical identity of one unit of asynchronous work within a render pass.
///
/// Two namespaces that cannot collide: caller-supplied keys canonicalize to
/// their JSON text (always starting with a quote, digit, bracket, brace,
/// `t`, `f`, or `-`), identity-derived keys carry an `@` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkKey(String);

impl WorkKey {
    pub fn from_caller_key(raw: &Value) -> Result<Self, RivuletError> {
        Ok(Self(canonicalize(raw)?))
    }

    pub fn from_identity(element_id: &str) -> Self {
        Self(format!("@{element_id}"))
    }

    /// The caller key dominates when one is supplied, so components sharing a
    /// key share one cache entry regardless of their element identities. The
    /// engine-supplied identity is the fallback for unkeyed work.
    pub fn derive(caller_key: Option<&Value>, element_id: &str) -> Result<Self, RivuletError> {
        match caller_key {
            Some(raw) => Self::from_caller_key(raw),
            None => Ok(Self::from_identity(element_id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic textual form of a caller-supplied key.
///
/// serde_json backs objects with a sorted map, so structurally equal values
/// always stringify identically and a re-render with the same key hits the
/// cache instead of re-fetching. `null` is rejected: it carries no identity,
/// callers wanting identity-keyed work omit the key entirely.
pub fn canonicalize(raw: &Value) -> Result<String, RivuletError> {
    if raw.is_null() {
        return Err(RivuletError::invalid_key(
            "null is not a key; omit the key to use the element identity",
        ));
    }
    serde_json::to_string(raw).map_err(|e| RivuletError::invalid_key(e.to_string()))
}

/// Generic entry point for any serializable key. Values without a stable,
/// finite textual representation (non-finite floats, non-string map keys,
/// opaque types) fail with `InvalidKey`.
pub fn normalize<K: Serialize>(raw: &K) -> Result<String, RivuletError> {
    let value = serde_json::to_value(raw)
        .map_err(|e| RivuletError::invalid_key(format!("not representable as plain data: {e}")))?;
    canonicalize(&value)
}

/// Injected capability supplying the rendering engine's per-activation
/// identity string. The core treats the string as opaque and stable only
/// within one component activation.
pub trait IdentitySource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Counter-based identity source for engines without their own identity
/// mechanism and for tests. Ids are stable per activation order.
pub struct SequentialIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: AtomicU64::new(0) }
    }
}

impl IdentitySource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonicalize_is_deterministic_across_key_order() {
        let a = json!({ "page": 1, "user": "ada" });
        let b = json!({ "user": "ada", "page": 1 });
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn test_string_and_number_keys_stay_distinct() {
        let as_string = canonicalize(&json!("1")).unwrap();
        let as_number = canonicalize(&json!(1)).unwrap();
        assert_ne!(as_string, as_number);
    }

    #[test]
    fn test_null_key_is_rejected() {
        let error = canonicalize(&Value::Null).unwrap_err();
        assert_eq!(error.code(), "INVALID_KEY");
    }

    #[test]
    fn test_normalize_rejects_non_finite_floats() {
        let error = normalize(&f64::NAN).unwrap_err();
        assert_eq!(error.code(), "INVALID_KEY");
    }

    #[test]
    fn test_derive_prefers_caller_key() {
        let key = json!("films");
        let first = WorkKey::derive(Some(&key), "el-1").unwrap();
        let second = WorkKey::derive(Some(&key), "el-2").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_falls_back_to_identity() {
        let first = WorkKey::derive(None, "el-1").unwrap();
        let second = WorkKey::derive(None, "el-2").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.as_str(), "@el-1");
    }

    #[test]
    fn test_identity_namespace_cannot_collide_with_caller_keys() {
        let identity = WorkKey::from_identity("el-1");
        let caller = WorkKey::from_caller_key(&json!("@el-1")).unwrap();
        assert_ne!(identity, caller);
    }

    #[test]
    fn test_sequential_ids_are_unique_and_prefixed() {
        let ids = SequentialIds::new("frame");
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert!(a.starts_with("frame:"));
    }
}
