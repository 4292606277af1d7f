//! Generation request parameters.

use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio used for pre-flight token estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Parameters of a single generation call, as seen by the governance layer.
///
/// The layer never builds prompts itself; it only needs enough of the
/// request to fingerprint it for the cache and to estimate its cost for the
/// rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user prompt.
    pub prompt: String,

    /// Model to use for generation.
    pub model: String,

    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling temperature (0.0 to 2.0).
    /// Requests without a temperature are never cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a request for `model` with the given prompt.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the system prompt.
    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Upper-bound token estimate used before the provider has answered.
    ///
    /// Input tokens are approximated at four characters per token; the
    /// completion is assumed to use its full `max_tokens` budget.
    pub fn estimated_tokens(&self) -> u64 {
        let input_chars = self.prompt.chars().count()
            + self
                .system_prompt
                .as_deref()
                .map_or(0, |s| s.chars().count());
        let input_tokens = input_chars.div_ceil(CHARS_PER_TOKEN) as u64;
        input_tokens + u64::from(self.max_tokens.unwrap_or(0))
    }
}
