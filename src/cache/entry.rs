//! Cache entries and their durable encoding.

use serde::{Deserialize, Serialize};

use crate::error::{GovernorError, Result};
use crate::types::AiResponse;

/// A memoized response with its bookkeeping.
///
/// Timestamps are Unix epoch milliseconds. An entry is usable while
/// `now < expires_at`; past that it is dead even if still stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: AiResponse,
    pub created_at: u64,
    pub hit_count: u64,
    pub expires_at: u64,
}

impl CacheEntry {
    pub(crate) fn new(response: AiResponse, now: u64, ttl_ms: u64) -> Self {
        Self {
            response,
            created_at: now,
            hit_count: 0,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Whether the entry is dead at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Decode the durable-tier record stored under `key`.
    ///
    /// A record that does not parse is reported as
    /// [`GovernorError::CorruptEntry`].
    pub fn decode(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| GovernorError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_exclusive() {
        let entry = CacheEntry::new(AiResponse::new("t", "m"), 1_000, 500);
        assert!(!entry.is_expired(1_499));
        assert!(entry.is_expired(1_500));
        assert!(entry.is_expired(2_000));
    }

    #[test]
    fn ttl_saturates() {
        let entry = CacheEntry::new(AiResponse::new("t", "m"), u64::MAX - 1, 10);
        assert_eq!(entry.expires_at, u64::MAX);
    }

    #[test]
    fn decode_rejects_garbage() {
        for raw in ["{not json", r#"{"response": 1}"#] {
            match CacheEntry::decode("vedr_cache:k", raw) {
                Err(GovernorError::CorruptEntry { key, reason }) => {
                    assert_eq!(key, "vedr_cache:k");
                    assert!(!reason.is_empty());
                }
                other => panic!("expected CorruptEntry, got {other:?}"),
            }
        }
    }

    #[test]
    fn encoded_record_decodes_to_same_entry() {
        let entry = CacheEntry::new(AiResponse::new("t", "m"), 1_000, 500);
        let raw = entry.encode().unwrap();
        assert_eq!(CacheEntry::decode("k", &raw).unwrap(), entry);
    }
}
