//! Submission gate integration tests over the mock environment:
//! identity promotion, spam quarantine, lockout, rate limiting.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use civicwatch_backend::environment::MockEnvironment;
use civicwatch_backend::gate::{LocationInput, RequestContext, SubmitReportRequest};
use civicwatch_backend::providers::{DeviceStore, PrincipalStore, ReportStore};
use civicwatch_core::error::CoreError;
use civicwatch_core::principal::{Permission, Principal, Role};
use civicwatch_core::report::ReportStatus;
use civicwatch_core::types::{FingerprintId, RiskTier};

fn fp(raw: &str) -> FingerprintId {
    FingerprintId::new(raw).unwrap()
}

fn request(incident_type: &str, description: &str, severity: u8) -> SubmitReportRequest {
    SubmitReportRequest {
        r#type: Some(incident_type.to_string()),
        description: Some(description.to_string()),
        location: Some(LocationInput {
            coordinates: Some([90.41, 23.81]),
            address: Some("Dhanmondi, Dhaka".to_string()),
            source: Some("gps".to_string()),
        }),
        severity: Some(severity),
        media: Vec::new(),
        anonymous: true,
        behavior_signature: None,
    }
}

fn context(fingerprint: &str) -> RequestContext {
    RequestContext {
        fingerprint: Some(fingerprint.to_string()),
        bearer_principal: None,
        ip: Some("203.0.113.5".to_string()),
        signature: None,
    }
}

#[tokio::test]
async fn first_submission_promotes_to_linked_identity() {
    let env = MockEnvironment::mocked();

    let response = env
        .submit_report(request("harassment", "Followed near the bridge", 3), context("fp-A"))
        .await
        .unwrap();

    // Report is pending, stamped with the promoted identity.
    let report = env.reports.get(response.id).await.unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(report.submitted_by.role, Role::Anonymous);
    assert_eq!(report.submitted_by.device_id, Some(fp("fp-A")));
    assert_eq!(report.submitted_by.ip_hash.as_ref().map(String::len), Some(16));
    assert!(report.submitted_by.anonymous);
    assert!(!report.submitted_by.principal_id.is_ephemeral());
    assert_ne!(report.location.public_point, report.location.original_point);

    // Exactly one persistent principal and one device, linked both ways.
    assert_eq!(env.principals.len(), 1);
    assert_eq!(env.devices.len(), 1);
    let device = env.devices.get(&fp("fp-A")).await.unwrap();
    let principal_id = device.principal_id.clone().unwrap();
    assert_eq!(principal_id, report.submitted_by.principal_id);
    let principal = env.principals.get(&principal_id).await.unwrap();
    assert_eq!(principal.security.primary_device, Some(fp("fp-A")));

    // Fresh device sits at the neutral baseline.
    assert_eq!(device.security.trust_score, 50.0);
    assert_eq!(device.security.risk_tier, RiskTier::Medium);
    assert_eq!(device.anomaly.score, 0.0);
    assert_eq!(device.security.total_reports_submitted, 1);
}

#[tokio::test]
async fn repeat_submissions_reuse_the_same_identity() {
    let env = MockEnvironment::mocked();
    env.submit_report(request("theft", "Phone snatched at the corner", 3), context("fp-A"))
        .await
        .unwrap();
    env.submit_report(request("theft", "Bag snatched at the corner", 3), context("fp-A"))
        .await
        .unwrap();

    assert_eq!(env.principals.len(), 1);
    assert_eq!(env.devices.len(), 1);
    let device = env.devices.get(&fp("fp-A")).await.unwrap();
    assert_eq!(device.security.total_reports_submitted, 2);
    assert_eq!(device.submission_pattern.total(), 2);
}

#[tokio::test]
async fn spam_burst_quarantines_after_the_sixth_report() {
    let env = MockEnvironment::mocked();

    for i in 0..6 {
        let result = env
            .submit_report(request("noise", "aaaaaaaaaaa", 2), context("fp-A"))
            .await;
        assert!(result.is_ok(), "submission {} should pass: {result:?}", i + 1);
        let report = env.reports.get(result.unwrap().id).await.unwrap();
        assert!(report.security_flags.potential_spam);
    }

    let device = env.devices.get(&fp("fp-A")).await.unwrap();
    assert_eq!(device.security.spam_reports, 6);
    assert!(device.should_quarantine());
    assert!(device.security.quarantine.active);
    let until = device.security.quarantine.until.unwrap();
    assert!(until > Utc::now() + Duration::hours(23));

    // The seventh hits the quarantine gate.
    let refused = env
        .submit_report(request("noise", "aaaaaaaaaaa", 2), context("fp-A"))
        .await;
    assert!(matches!(refused, Err(CoreError::Quarantined { .. })));
}

#[tokio::test]
async fn device_quarantine_self_heals_after_deadline() {
    let env = MockEnvironment::mocked();
    env.submit_report(request("theft", "Wallet lifted at the stop", 2), context("fp-A"))
        .await
        .unwrap();

    // Impose a quarantine whose deadline is already in the past.
    let mut device = env.devices.get(&fp("fp-A")).await.unwrap();
    device.security.quarantine = civicwatch_core::device::QuarantineState {
        active: true,
        until: Some(Utc::now() - Duration::minutes(1)),
        reason: Some("test".to_string()),
    };
    env.devices.update(&device).await.unwrap();
    env.invalidate_device_cache(&fp("fp-A")).await;

    // Next access heals it and the request goes through.
    env.submit_report(request("theft", "Wallet lifted again", 2), context("fp-A"))
        .await
        .unwrap();
    let device = env.devices.get(&fp("fp-A")).await.unwrap();
    assert!(!device.security.quarantine.active);
}

#[tokio::test]
async fn admin_lockout_after_five_failures_within_window() {
    let env = MockEnvironment::mocked();
    let mut admin = Principal::new_admin(
        "alice",
        "alice@example.com",
        5,
        vec![Permission::Moderation],
        Utc::now(),
    );
    admin.set_password("s3cret-passphrase").unwrap();
    env.principals.insert(&admin).await.unwrap();

    for i in 0..5 {
        let result = env.verify_admin_credentials("alice", "wrong").await;
        assert!(
            matches!(result, Err(CoreError::Unauthenticated)),
            "attempt {} should answer unauthenticated",
            i + 1
        );
    }

    let stored = env.principals.find_by_username("alice").await.unwrap().unwrap();
    let profile = stored.admin().unwrap();
    assert_eq!(profile.login_attempts, 5);
    let lock_until = profile.lock_until.unwrap();
    assert!(lock_until > Utc::now() + Duration::minutes(29));
    assert!(lock_until <= Utc::now() + Duration::minutes(31));

    // The correct password now answers locked, not success.
    let result = env.verify_admin_credentials("alice", "s3cret-passphrase").await;
    assert!(matches!(result, Err(CoreError::AccountLocked { .. })));
}

#[tokio::test]
async fn four_failures_do_not_lock() {
    let env = MockEnvironment::mocked();
    let mut admin = Principal::new_admin(
        "bob",
        "bob@example.com",
        5,
        vec![Permission::Moderation],
        Utc::now(),
    );
    admin.set_password("another-passphrase").unwrap();
    env.principals.insert(&admin).await.unwrap();

    for _ in 0..4 {
        let _ = env.verify_admin_credentials("bob", "wrong").await;
    }
    let principal = env
        .verify_admin_credentials("bob", "another-passphrase")
        .await
        .unwrap();
    assert_eq!(principal.admin().unwrap().login_attempts, 0);
    assert!(principal.admin().unwrap().last_login.is_some());
}

#[tokio::test]
async fn missing_fields_are_named() {
    let env = MockEnvironment::mocked();

    let mut body = request("theft", "A believable description", 3);
    body.description = None;
    let error = env.submit_report(body, context("fp-A")).await.unwrap_err();
    assert!(matches!(
        error,
        CoreError::MissingField {
            field: "description"
        }
    ));

    let mut body = request("theft", "A believable description", 3);
    body.severity = Some(9);
    let error = env.submit_report(body, context("fp-A")).await.unwrap_err();
    assert_eq!(error.kind(), "invalid_value");

    // Nothing durable happened.
    assert!(env.reports.is_empty());
    assert!(env.devices.is_empty());
}

#[tokio::test]
async fn submission_rate_limit_applies_per_device() {
    let mut env = MockEnvironment::mocked();
    env.config.gate.submission_limit = 2;

    env.submit_report(request("theft", "First believable report", 2), context("fp-A"))
        .await
        .unwrap();
    env.submit_report(request("theft", "Second believable report", 2), context("fp-A"))
        .await
        .unwrap();
    let error = env
        .submit_report(request("theft", "Third believable report", 2), context("fp-A"))
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::RateLimited { .. }));

    // A different device still has budget.
    env.submit_report(request("theft", "Another device reporting", 2), context("fp-B"))
        .await
        .unwrap();
}

#[tokio::test]
async fn submission_without_fingerprint_still_gets_a_durable_owner() {
    let env = MockEnvironment::mocked();
    let context = RequestContext {
        fingerprint: None,
        bearer_principal: None,
        ip: Some("198.51.100.9".to_string()),
        signature: None,
    };
    let response = env
        .submit_report(request("theft", "No fingerprint presented here", 2), context)
        .await
        .unwrap();

    let report = env.reports.get(response.id).await.unwrap();
    assert!(!report.submitted_by.principal_id.is_ephemeral());
    assert_eq!(report.submitted_by.device_id, None);
    assert_eq!(env.principals.len(), 1);
    assert!(env.devices.is_empty());
}

#[tokio::test]
async fn dangling_device_link_is_healed_at_promotion() {
    let env = MockEnvironment::mocked();

    // A device whose linked principal is missing.
    let mut orphan = civicwatch_core::device::Device::new(fp("fp-X"), Utc::now());
    orphan.principal_id = Some(civicwatch_core::types::PrincipalId::new());
    env.devices.insert(&orphan).await.unwrap();

    env.submit_report(request("theft", "Healing a dangling link", 2), context("fp-X"))
        .await
        .unwrap();

    let device = env.devices.get(&fp("fp-X")).await.unwrap();
    let principal = env
        .principals
        .get(device.principal_id.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(principal.role(), Role::Anonymous);
    assert_eq!(env.principals.len(), 1);
}

#[tokio::test]
async fn device_reads_go_through_the_cache() {
    let env = MockEnvironment::mocked();
    env.submit_report(request("theft", "A believable description", 3), context("fp-A"))
        .await
        .unwrap();

    // Warm the caches.
    let cached = env.find_device_cached(&fp("fp-A")).await.unwrap().unwrap();
    let trust = env.cached_trust_score(&fp("fp-A")).await.unwrap();
    assert_eq!(trust, cached.security.trust_score);

    // Mutate the store behind the cache's back: cached values persist
    // until invalidation.
    let mut device = env.devices.get(&fp("fp-A")).await.unwrap();
    device.threat.botnet_member = true;
    device.security.trust_score = 1.0;
    env.devices.update(&device).await.unwrap();

    let still_cached = env.find_device_cached(&fp("fp-A")).await.unwrap().unwrap();
    assert!(!still_cached.threat.botnet_member);
    assert_eq!(env.cached_trust_score(&fp("fp-A")).await.unwrap(), trust);

    // Invalidation makes the next read authoritative.
    env.invalidate_device_cache(&fp("fp-A")).await;
    let fresh = env.find_device_cached(&fp("fp-A")).await.unwrap().unwrap();
    assert!(fresh.threat.botnet_member);
}

#[tokio::test]
async fn new_pending_report_event_is_emitted() {
    let env = MockEnvironment::mocked();
    env.submit_report(request("theft", "A believable description", 3), context("fp-A"))
        .await
        .unwrap();
    let names = env.notifier.event_names();
    assert!(names.contains(&"new_pending_report"));
}
