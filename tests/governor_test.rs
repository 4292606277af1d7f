//! End-to-end tests for [`Governor`]: admission, cache consultation, usage
//! recording and response storage around a caller-supplied generator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vedrfolnir::cache::{CacheConfig, MemoryStore};
use vedrfolnir::clock::ManualClock;
use vedrfolnir::config::GovernanceConfig;
use vedrfolnir::ratelimit::{IdentityClass, RateLimitConfig, RejectReason, Window};
use vedrfolnir::{
    AiResponse, CachePolicy, GenerationRequest, Governor, GovernorError, Result, Usage,
};

const T0: u64 = 1_700_000_000_000;

const LONG_ANSWER: &str =
    "Paris is the capital of France, and has been for most of the last millennium.";

fn governor() -> (Governor, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let governor = Governor::builder()
        .clock(clock.clone())
        .build()
        .unwrap();
    (governor, clock)
}

fn request() -> GenerationRequest {
    GenerationRequest::new("claude-sonnet", "What is the capital of France?")
        .temperature(0.2)
        .max_tokens(100)
}

/// Counts generator invocations and answers with a fixed text.
#[derive(Clone, Default)]
struct Provider {
    calls: Arc<AtomicUsize>,
}

impl Provider {
    async fn answer(&self, req: GenerationRequest, text: &str) -> Result<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AiResponse::new(text, req.model).with_usage(Usage::new(12, 40)))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// =========================================================================
// Cache consultation
// =========================================================================

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    let (governor, _clock) = governor();
    let provider = Provider::default();

    let first = governor
        .generate("u", IdentityClass::Free, &request(), |req| {
            let p = provider.clone();
            async move { p.answer(req, LONG_ANSWER).await }
        })
        .await
        .unwrap();
    assert!(!first.cache_hit);
    assert!(first.decision.allowed);

    // Differently formatted, same fingerprint.
    let reformatted = GenerationRequest::new("claude-sonnet", "  what is the CAPITAL of france?")
        .temperature(0.2)
        .max_tokens(100);
    let second = governor
        .generate("u", IdentityClass::Free, &reformatted, |req| {
            let p = provider.clone();
            async move { p.answer(req, "should not be called").await }
        })
        .await
        .unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.response.text, LONG_ANSWER);
    assert_eq!(provider.calls(), 1);

    // Only the provider call counts as usage.
    let usage = governor.limiter().get_usage_metrics(Some("u"));
    assert_eq!(usage.total_requests, 1);
    assert_eq!(usage.total_tokens, 52);
}

#[tokio::test]
async fn cache_hits_do_not_consume_quota() {
    let (governor, _clock) = governor();
    let provider = Provider::default();

    // Guest: 2 per minute. One real call, then many hits.
    for _ in 0..6 {
        let out = governor
            .generate("g", IdentityClass::Guest, &request(), |req| {
                let p = provider.clone();
                async move { p.answer(req, LONG_ANSWER).await }
            })
            .await
            .unwrap();
        assert_eq!(out.response.text, LONG_ANSWER);
    }
    assert_eq!(provider.calls(), 1);
    assert_eq!(governor.cache().get_stats().hits, 5);
}

#[tokio::test]
async fn high_temperature_bypasses_cache() {
    let (governor, _clock) = governor();
    let provider = Provider::default();
    let hot = request().temperature(1.2);

    for _ in 0..2 {
        let out = governor
            .generate("u", IdentityClass::Premium, &hot, |req| {
                let p = provider.clone();
                async move { p.answer(req, LONG_ANSWER).await }
            })
            .await
            .unwrap();
        assert!(!out.cache_hit);
    }
    assert_eq!(provider.calls(), 2);
    assert_eq!(governor.cache().get_stats().saves, 0);
}

#[tokio::test]
async fn request_without_temperature_is_not_cached() {
    let (governor, _clock) = governor();
    let provider = Provider::default();
    let plain = GenerationRequest::new("claude-sonnet", "hello");

    for _ in 0..2 {
        governor
            .generate("u", IdentityClass::Premium, &plain, |req| {
                let p = provider.clone();
                async move { p.answer(req, LONG_ANSWER).await }
            })
            .await
            .unwrap();
    }
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn short_responses_are_not_stored() {
    let (governor, _clock) = governor();
    let provider = Provider::default();

    for _ in 0..2 {
        governor
            .generate("u", IdentityClass::Premium, &request(), |req| {
                let p = provider.clone();
                async move { p.answer(req, "Paris.").await }
            })
            .await
            .unwrap();
    }
    assert_eq!(provider.calls(), 2);
    assert_eq!(governor.cache().get_stats().saves, 0);
}

#[tokio::test]
async fn custom_policy_changes_thresholds() {
    let clock = Arc::new(ManualClock::new(T0));
    let governor = Governor::builder()
        .clock(clock)
        .policy(CachePolicy {
            max_temperature: 1.5,
            min_response_len: 1,
        })
        .build()
        .unwrap();
    let provider = Provider::default();
    let warm = request().temperature(1.2);

    for _ in 0..2 {
        governor
            .generate("u", IdentityClass::Premium, &warm, |req| {
                let p = provider.clone();
                async move { p.answer(req, "Paris.").await }
            })
            .await
            .unwrap();
    }
    assert_eq!(provider.calls(), 1);
}

// =========================================================================
// Admission
// =========================================================================

#[tokio::test]
async fn rejected_request_never_reaches_provider() {
    let (governor, _clock) = governor();
    let provider = Provider::default();

    // Distinct uncacheable prompts so every call goes to the provider.
    for i in 0..2 {
        let req = GenerationRequest::new("m", format!("prompt {i}"));
        governor
            .generate("g", IdentityClass::Guest, &req, |req| {
                let p = provider.clone();
                async move { p.answer(req, LONG_ANSWER).await }
            })
            .await
            .unwrap();
    }

    let err = governor
        .generate(
            "g",
            IdentityClass::Guest,
            &GenerationRequest::new("m", "third"),
            |req| {
                let p = provider.clone();
                async move { p.answer(req, LONG_ANSWER).await }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(provider.calls(), 2);
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    match err {
        GovernorError::RateLimited { reason, reset_at, .. } => {
            assert_eq!(
                reason,
                RejectReason::WindowLimit {
                    window: Window::Minute
                }
            );
            assert_eq!(reset_at, T0 + 60_000);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn generator_failure_records_nothing() {
    let (governor, _clock) = governor();

    let err = governor
        .generate("u", IdentityClass::Free, &request(), |_req| async {
            Err::<AiResponse, _>(GovernorError::Generation("provider timed out".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, GovernorError::Generation(_)));
    assert_eq!(governor.limiter().get_usage_metrics(Some("u")).total_requests, 0);
    assert_eq!(governor.cache().get_stats().saves, 0);
}

#[tokio::test]
async fn missing_usage_falls_back_to_estimate() {
    let (governor, _clock) = governor();
    let req = request();
    let estimate = req.estimated_tokens();

    governor
        .generate("u", IdentityClass::Free, &req, |req| async move {
            Ok(AiResponse::new(LONG_ANSWER, req.model))
        })
        .await
        .unwrap();

    let usage = governor.limiter().get_usage_metrics(Some("u"));
    assert_eq!(usage.total_tokens, estimate);
}

#[tokio::test]
async fn emergency_brake_blocks_everyone() {
    let clock = Arc::new(ManualClock::new(T0));
    let governor = Governor::builder()
        .clock(clock)
        .rate_limit(
            RateLimitConfig::new()
                .cost_per_token(0.01)
                .emergency_brake(0.5, 5.0),
        )
        .build()
        .unwrap();

    // 52 tokens at $0.01 = $0.52 spent in the hour.
    let provider = Provider::default();
    governor
        .generate("a", IdentityClass::Admin, &GenerationRequest::new("m", "x"), |req| {
            let p = provider.clone();
            async move { p.answer(req, LONG_ANSWER).await }
        })
        .await
        .unwrap();

    let err = governor
        .generate("b", IdentityClass::Admin, &GenerationRequest::new("m", "y"), |req| {
            let p = provider.clone();
            async move { p.answer(req, LONG_ANSWER).await }
        })
        .await
        .unwrap_err();
    match err {
        GovernorError::RateLimited { reason, .. } => {
            assert_eq!(reason, RejectReason::HourlyCostLimit);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

// =========================================================================
// Construction
// =========================================================================

#[tokio::test]
async fn builder_with_durable_store_persists_responses() {
    let store = Arc::new(MemoryStore::new());
    let governor = Governor::builder()
        .durable_store(store.clone())
        .build()
        .unwrap();

    governor
        .generate("u", IdentityClass::Free, &request(), |req| async move {
            Ok(AiResponse::new(LONG_ANSWER, req.model))
        })
        .await
        .unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn builder_rejects_invalid_configuration() {
    let result = Governor::builder()
        .cache(CacheConfig::new().ttl(Duration::ZERO))
        .build();
    assert!(matches!(result, Err(GovernorError::Configuration(_))));

    let result = Governor::builder()
        .rate_limit(RateLimitConfig::new().emergency_brake(0.0, 1.0))
        .build();
    assert!(matches!(result, Err(GovernorError::Configuration(_))));
}

#[tokio::test]
async fn builder_from_config_uses_configured_store() {
    let config = GovernanceConfig::from_toml(
        r#"
        [cache]
        max_size = 3

        [storage]
        backend = "none"

        [rate_limit.rule_sets.guest]
        minute = 1
        "#,
    )
    .unwrap();
    let governor = vedrfolnir::GovernorBuilder::from_config(&config)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(governor.cache().get_stats().config.max_size, 3);
    assert_eq!(governor.limiter().config().rule_sets.guest.minute, Some(1));
}

#[tokio::test(start_paused = true)]
async fn cleanup_tasks_start_and_stop() {
    let (governor, _clock) = governor();
    let tasks = governor.spawn_cleanup();
    tokio::time::sleep(Duration::from_secs(601)).await;
    tasks.shutdown().await;
}
