//! Request fingerprinting.
//!
//! A [`RequestFingerprint`] is the normalized identity of a generation
//! request: prompt and system prompt trimmed and lower-cased, temperature
//! rounded to two decimals. Two requests that normalize identically share a
//! cache key.
//!
//! The key is derived by serializing the normalized fields with serde_json
//! and folding the result through a 32-bit rolling hash. Field order in the
//! serialized form comes from the struct declaration, so it cannot depend on
//! how the caller assembled the request. The hash is stable across processes
//! and platforms, which the durable tier relies on.

use serde::{Deserialize, Serialize};

use crate::types::GenerationRequest;

/// Normalized, hashable identity of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    prompt: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl RequestFingerprint {
    /// Normalize raw request parameters into a fingerprint.
    pub fn new(
        prompt: &str,
        model: &str,
        system_prompt: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            prompt: normalize_text(prompt),
            model: model.to_owned(),
            system_prompt: system_prompt.map(normalize_text),
            temperature: temperature.map(round_temperature),
            max_tokens,
        }
    }

    /// Normalized prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Model identifier (not normalized; model IDs are case-sensitive).
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Normalized temperature, rounded to two decimals.
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Compute the cache key for this fingerprint.
    pub fn cache_key(&self) -> String {
        // Serializing a plain struct of strings and numbers cannot fail; the
        // Debug fallback keeps the key deterministic regardless.
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        to_base36(rolling_hash(&canonical).unsigned_abs())
    }
}

impl From<&GenerationRequest> for RequestFingerprint {
    fn from(request: &GenerationRequest) -> Self {
        Self::new(
            &request.prompt,
            &request.model,
            request.system_prompt.as_deref(),
            request.temperature,
            request.max_tokens,
        )
    }
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn round_temperature(temperature: f32) -> f64 {
    (f64::from(temperature) * 100.0).round() / 100.0
}

/// 32-bit signed rolling hash (`h = h * 31 + unit`, wrapping) over the
/// UTF-16 code units of `input`.
fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::with_capacity(7);
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_hash_matches_known_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        // 97 * 31 + 98
        assert_eq!(rolling_hash("ab"), 3105);
    }

    #[test]
    fn rolling_hash_wraps_instead_of_overflowing() {
        let long = "z".repeat(10_000);
        // Must not panic in debug builds.
        let _ = rolling_hash(&long);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }

    #[test]
    fn normalization_trims_and_folds_case() {
        let a = RequestFingerprint::new("  Hello World ", "m", Some(" SYSTEM "), None, None);
        let b = RequestFingerprint::new("hello world", "m", Some("system"), None, None);
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn temperature_rounds_to_two_decimals() {
        let a = RequestFingerprint::new("p", "m", None, Some(0.701), None);
        let b = RequestFingerprint::new("p", "m", None, Some(0.7), None);
        assert_eq!(a.temperature(), Some(0.7));
        assert_eq!(a.cache_key(), b.cache_key());

        let c = RequestFingerprint::new("p", "m", None, Some(0.71), None);
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn model_is_case_sensitive() {
        let a = RequestFingerprint::new("p", "GPT-4", None, None, None);
        let b = RequestFingerprint::new("p", "gpt-4", None, None, None);
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn each_field_contributes_to_key() {
        let base = RequestFingerprint::new("p", "m", Some("s"), Some(0.5), Some(100));
        let variants = [
            RequestFingerprint::new("q", "m", Some("s"), Some(0.5), Some(100)),
            RequestFingerprint::new("p", "n", Some("s"), Some(0.5), Some(100)),
            RequestFingerprint::new("p", "m", None, Some(0.5), Some(100)),
            RequestFingerprint::new("p", "m", Some("s"), Some(0.6), Some(100)),
            RequestFingerprint::new("p", "m", Some("s"), Some(0.5), None),
        ];
        for v in &variants {
            assert_ne!(base.cache_key(), v.cache_key(), "{v:?}");
        }
    }
}
