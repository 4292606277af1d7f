use std::time::Duration;

use vedrfolnir::ratelimit::{RejectReason, Window};
use vedrfolnir::{GovernorError, Result};

fn rate_limited(reason: RejectReason, retry_after: Option<Duration>) -> GovernorError {
    GovernorError::RateLimited {
        reason,
        retry_after,
        reset_at: 0,
    }
}

#[test]
fn test_error_display() {
    let err = GovernorError::CorruptEntry {
        key: "vedr_cache:abc".into(),
        reason: "expected value".into(),
    };
    assert!(err.to_string().contains("vedr_cache:abc"));

    let err = GovernorError::StorageFull { key: "k".into() };
    assert!(err.to_string().contains("storage full"));
}

#[test]
fn test_rate_limited_display_names_reason() {
    let err = rate_limited(
        RejectReason::WindowLimit {
            window: Window::Hour,
        },
        Some(Duration::from_secs(5)),
    );
    let msg = err.to_string();
    assert!(msg.contains("per-hour request limit exceeded"), "{msg}");
    assert!(msg.contains("5s"), "{msg}");
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(GovernorError::InvalidInput("empty identity".into()))
    }
    assert!(returns_error().is_err());
}

#[test]
fn test_from_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: GovernorError = json_err.into();
    assert!(matches!(err, GovernorError::Json(_)));

    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
    let err: GovernorError = io_err.into();
    assert!(matches!(err, GovernorError::Io(_)));
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn retry_after_only_for_rate_limits() {
    let err = rate_limited(RejectReason::DailyCostLimit, Some(Duration::from_secs(30)));
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

    let err = GovernorError::Storage("down".into());
    assert!(!err.is_rate_limited());
    assert_eq!(err.retry_after(), None);
}

#[test]
fn transient_errors() {
    assert!(GovernorError::Storage("connection reset".into()).is_transient());
    assert!(GovernorError::StorageFull { key: "k".into() }.is_transient());
    assert!(
        GovernorError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr"))
            .is_transient()
    );
}

#[test]
fn non_transient_errors() {
    assert!(!rate_limited(RejectReason::HourlyCostLimit, None).is_transient());
    assert!(!GovernorError::Configuration("bad".into()).is_transient());
    assert!(!GovernorError::InvalidInput("bad".into()).is_transient());
    assert!(!GovernorError::Generation("provider failed".into()).is_transient());
}

// ============================================================================
// User-facing messages
// ============================================================================

#[test]
fn brake_rejections_blame_the_service() {
    for reason in [RejectReason::HourlyCostLimit, RejectReason::DailyCostLimit] {
        assert!(reason.is_emergency_brake());
        assert!(!reason.user_message("14:00").contains("14:00"));
    }
}

#[test]
fn quota_rejections_name_the_reset_time() {
    let msg = RejectReason::WindowLimit {
        window: Window::Day,
    }
    .user_message("14:00");
    assert_eq!(msg, "You've hit your usage limit until 14:00.");

    for window in Window::ALL {
        for reason in [
            RejectReason::WindowLimit { window },
            RejectReason::Throttled { window },
        ] {
            assert!(!reason.is_emergency_brake());
            assert!(reason.user_message("14:00").contains("14:00"));
        }
    }
}
