//! Composition of the rate limiter and the response cache.

mod builder;

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::cache::{CacheManager, CachePolicy, RequestFingerprint};
use crate::ratelimit::{IdentityClass, RateLimitDecision, RateLimiter};
use crate::sweeper::CleanupTask;
use crate::types::{AiResponse, GenerationRequest};

pub use builder::GovernorBuilder;

/// A response together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernedResponse {
    pub response: AiResponse,
    /// Whether the response was served from the cache.
    pub cache_hit: bool,
    /// The admission decision that let the request through.
    pub decision: RateLimitDecision,
}

/// Runs generation calls through rate limiting and caching.
///
/// For every call: check the rate limit, consult the cache if the request
/// is cacheable, otherwise call the provider, record usage and store the
/// response. Cache hits are admitted by the limiter but do not count as
/// usage.
///
/// ```rust,no_run
/// use vedrfolnir::{AiResponse, GenerationRequest, Governor, IdentityClass};
///
/// # async fn run() -> vedrfolnir::Result<()> {
/// let governor = Governor::builder().build()?;
/// let request = GenerationRequest::new("claude-sonnet", "Summarise this.").temperature(0.2);
///
/// let out = governor
///     .generate("user-42", IdentityClass::Free, &request, |req| async move {
///         // call the provider here
///         Ok(AiResponse::new(format!("summary of: {}", req.prompt), req.model))
///     })
///     .await?;
/// println!("{} (cached: {})", out.response.text, out.cache_hit);
/// # Ok(())
/// # }
/// ```
pub struct Governor {
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimiter>,
    policy: CachePolicy,
}

impl Governor {
    /// Create a builder for configuring the governor.
    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::new()
    }

    /// Compose existing components.
    pub fn new(cache: Arc<CacheManager>, limiter: Arc<RateLimiter>, policy: CachePolicy) -> Self {
        Self {
            cache,
            limiter,
            policy,
        }
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// The underlying rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The cache-worthiness policy in effect.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Run `generate` for `request` on behalf of `identity`.
    ///
    /// Returns [`GovernorError::RateLimited`](crate::GovernorError::RateLimited)
    /// if the limiter rejects the request, and the generator's own error if
    /// it fails; in the latter case nothing is recorded or cached. Usage is
    /// recorded from the provider-reported token count, falling back to the
    /// request's estimate.
    pub async fn generate<F, Fut>(
        &self,
        identity: &str,
        class: IdentityClass,
        request: &GenerationRequest,
        generate: F,
    ) -> Result<GovernedResponse>
    where
        F: FnOnce(GenerationRequest) -> Fut,
        Fut: Future<Output = Result<AiResponse>>,
    {
        let estimated_tokens = request.estimated_tokens();
        let decision = self
            .limiter
            .check_rate_limit(identity, class, estimated_tokens)
            .into_result()?;

        let cacheable = self.policy.should_consult(request);
        let fingerprint = RequestFingerprint::from(request);
        if cacheable {
            if let Some(response) = self.cache.get(&fingerprint).await {
                debug!(identity, model = %request.model, "served from cache");
                return Ok(GovernedResponse {
                    response,
                    cache_hit: true,
                    decision,
                });
            }
        }

        let response = generate(request.clone()).await?;

        let tokens = response
            .usage
            .map_or(estimated_tokens, |u| u64::from(u.total_tokens));
        self.limiter.record_request(identity, tokens, class);

        if cacheable && self.policy.should_store(&response) {
            self.cache.set(&fingerprint, response.clone(), None).await;
        }

        Ok(GovernedResponse {
            response,
            cache_hit: false,
            decision,
        })
    }

    /// Spawn the periodic cleanup tasks of both components.
    ///
    /// Keep the returned handle for the lifetime of the governor and call
    /// [`GovernorTasks::shutdown`] on process stop.
    pub fn spawn_cleanup(&self) -> GovernorTasks {
        GovernorTasks {
            cache: self.cache.spawn_cleanup(),
            limiter: self.limiter.spawn_cleanup(),
        }
    }
}

/// Background cleanup tasks owned by the caller.
pub struct GovernorTasks {
    cache: CleanupTask,
    limiter: CleanupTask,
}

impl GovernorTasks {
    /// Stop both tasks.
    pub async fn shutdown(self) {
        self.cache.shutdown().await;
        self.limiter.shutdown().await;
    }
}
