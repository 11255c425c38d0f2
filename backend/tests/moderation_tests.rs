//! Moderation and community-validation integration tests.

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use civicwatch_backend::environment::MockEnvironment;
use civicwatch_backend::gate::{LocationInput, RequestContext, SubmitReportRequest};
use civicwatch_backend::providers::{DeviceStore, PrincipalStore, ReportStore};
use civicwatch_core::device::Device;
use civicwatch_core::error::CoreError;
use civicwatch_core::principal::{Permission, Principal};
use civicwatch_core::report::ReportStatus;
use civicwatch_core::types::{FingerprintId, ReportId};

fn fp(raw: &str) -> FingerprintId {
    FingerprintId::new(raw).unwrap()
}

fn context(fingerprint: &str) -> RequestContext {
    RequestContext {
        fingerprint: Some(fingerprint.to_string()),
        bearer_principal: None,
        ip: Some("203.0.113.5".to_string()),
        signature: None,
    }
}

async fn seed_moderator(env: &MockEnvironment) -> Principal {
    let admin = Principal::new_admin(
        "mod-alice",
        "alice@example.com",
        7,
        vec![Permission::Moderation],
        Utc::now(),
    );
    env.principals.insert(&admin).await.unwrap()
}

async fn seed_report(env: &MockEnvironment, incident_type: &str, severity: u8) -> ReportId {
    let request = SubmitReportRequest {
        r#type: Some(incident_type.to_string()),
        description: Some("Something believable happened here".to_string()),
        location: Some(LocationInput {
            coordinates: Some([90.41, 23.81]),
            address: None,
            source: Some("gps".to_string()),
        }),
        severity: Some(severity),
        media: Vec::new(),
        anonymous: true,
        behavior_signature: None,
    };
    env.submit_report(request, context("fp-submitter"))
        .await
        .unwrap()
        .id
}

async fn seed_validator(env: &MockEnvironment, fingerprint: &str) {
    env.devices
        .insert(&Device::new(fp(fingerprint), Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn moderator_approval_emits_event_and_counts_outcome() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;

    let report = env
        .change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Approved);
    assert_eq!(report.moderation.moderated_by.as_deref(), Some("mod-alice"));

    let device = env.devices.get(&fp("fp-submitter")).await.unwrap();
    assert_eq!(device.security.approved_reports, 1);

    assert!(env.notifier.event_names().contains(&"report_approved"));
    let audit = env.audit.entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action_type, "report_status_change");
}

#[tokio::test]
async fn non_moderator_cannot_change_status() {
    let env = MockEnvironment::mocked();
    let report_id = seed_report(&env, "theft", 3).await;

    let bystander = Principal::new_admin(
        "no-perms",
        "np@example.com",
        1,
        vec![Permission::Analytics],
        Utc::now(),
    );
    let error = env
        .change_report_status(&bystander, report_id, ReportStatus::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::ForbiddenRole { .. }));
}

#[tokio::test]
async fn invalid_transition_names_the_invariant() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;

    env.change_report_status(&moderator, report_id, ReportStatus::Rejected, None)
        .await
        .unwrap();
    let error = env
        .change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap_err();
    let CoreError::InvalidTransition { invariant } = error else {
        unreachable!("expected InvalidTransition, got {error:?}");
    };
    assert!(invariant.contains("rejected"));
}

#[tokio::test]
async fn deletion_is_terminal_even_for_moderators() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;

    env.delete_report(&moderator, report_id).await.unwrap();
    assert!(env.notifier.event_names().contains(&"report_deleted"));

    let error = env
        .change_report_status(&moderator, report_id, ReportStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn three_positive_validations_verify_an_approved_report() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    // severity 3, not female-sensitive: minimum three validators.
    let report_id = seed_report(&env, "theft", 3).await;
    env.change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();

    for validator in ["fp-d1", "fp-d2", "fp-d3"] {
        seed_validator(&env, validator).await;
    }

    let outcome = env
        .validate_report(report_id, true, &context("fp-d1"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Approved);

    let outcome = env
        .validate_report(report_id, true, &context("fp-d2"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Approved);

    let outcome = env
        .validate_report(report_id, true, &context("fp-d3"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Verified);
    assert_eq!(outcome.community_trust, 100.0);
    assert!(env.notifier.event_names().contains(&"report_verified"));

    // A fourth validation from a device that already voted is refused.
    let error = env
        .validate_report(report_id, true, &context("fp-d1"))
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::DuplicateValidation));

    // The validator device carries the act in its history.
    let d1 = env.devices.get(&fp("fp-d1")).await.unwrap();
    assert_eq!(d1.security.total_validations_given, 1);
    assert!(d1.has_validated(report_id));
}

#[tokio::test]
async fn negative_validations_push_back_to_review() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;
    env.change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();

    for validator in ["fp-d1", "fp-d2", "fp-d3"] {
        seed_validator(&env, validator).await;
    }

    // A lone negative collapses community trust below 20 and pushes the
    // report back immediately.
    let outcome = env
        .validate_report(report_id, false, &context("fp-d1"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::UnderReview);
    assert!(env
        .notifier
        .event_names()
        .contains(&"report_flagged_for_review"));
}

#[tokio::test]
async fn negative_majority_pushes_back_via_the_count_rule() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;
    env.change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();

    for validator in ["fp-d1", "fp-d2", "fp-d3", "fp-d4", "fp-d5"] {
        seed_validator(&env, validator).await;
    }

    // Two positives keep trust well above the collapse line, so only
    // the negative-count rule can trigger.
    env.validate_report(report_id, true, &context("fp-d1"))
        .await
        .unwrap();
    env.validate_report(report_id, true, &context("fp-d2"))
        .await
        .unwrap();
    let outcome = env
        .validate_report(report_id, false, &context("fp-d3"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Approved);
    let outcome = env
        .validate_report(report_id, false, &context("fp-d4"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Approved);
    let outcome = env
        .validate_report(report_id, false, &context("fp-d5"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::UnderReview);
}

#[tokio::test]
async fn self_validation_is_refused() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    let report_id = seed_report(&env, "theft", 3).await;
    env.change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();

    let error = env
        .validate_report(report_id, true, &context("fp-submitter"))
        .await
        .unwrap_err();
    assert!(matches!(error, CoreError::SelfValidation));
}

#[tokio::test]
async fn pending_reports_do_not_auto_transition() {
    let env = MockEnvironment::mocked();
    let report_id = seed_report(&env, "theft", 3).await;
    for validator in ["fp-d1", "fp-d2", "fp-d3"] {
        seed_validator(&env, validator).await;
    }
    for validator in ["fp-d1", "fp-d2", "fp-d3"] {
        env.validate_report(report_id, true, &context(validator))
            .await
            .unwrap();
    }
    let report = env.reports.get(report_id).await.unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
}

#[tokio::test]
async fn female_sensitive_reports_demand_an_extra_validator() {
    let env = MockEnvironment::mocked();
    let moderator = seed_moderator(&env).await;
    // harassment at severity 3: minimum four validators.
    let report_id = seed_report(&env, "harassment", 3).await;
    env.change_report_status(&moderator, report_id, ReportStatus::Approved, None)
        .await
        .unwrap();

    for validator in ["fp-d1", "fp-d2", "fp-d3", "fp-d4"] {
        seed_validator(&env, validator).await;
    }
    for validator in ["fp-d1", "fp-d2", "fp-d3"] {
        let outcome = env
            .validate_report(report_id, true, &context(validator))
            .await
            .unwrap();
        assert_eq!(outcome.status, ReportStatus::Approved);
    }
    let outcome = env
        .validate_report(report_id, true, &context("fp-d4"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ReportStatus::Verified);
}

#[tokio::test]
async fn reaper_clears_lapsed_principal_quarantines() {
    let env = MockEnvironment::mocked();
    let mut principal = Principal::new_anonymous_from_device(fp("fp-A"), Utc::now());
    principal.security.quarantine = civicwatch_core::device::QuarantineState {
        active: true,
        until: Some(Utc::now() - chrono::Duration::minutes(1)),
        reason: Some("lapsed".to_string()),
    };
    env.principals.insert(&principal).await.unwrap();

    assert_eq!(env.reap_expired_quarantines().await.unwrap(), 1);
    let healed = env.principals.get(&principal.id).await.unwrap();
    assert!(!healed.security.quarantine.active);

    // Idempotent: nothing left to heal.
    assert_eq!(env.reap_expired_quarantines().await.unwrap(), 0);
}

#[tokio::test]
async fn operator_quarantine_toggles_are_audited() {
    let env = MockEnvironment::mocked();
    let operator = Principal::new_admin(
        "sec-op",
        "sec@example.com",
        8,
        vec![Permission::SecurityMonitoring, Permission::Moderation],
        Utc::now(),
    );
    env.principals.insert(&operator).await.unwrap();
    seed_validator(&env, "fp-bad").await;

    let device = env
        .set_device_quarantine(&operator, &fp("fp-bad"), true, Some("manual".to_string()))
        .await
        .unwrap();
    assert!(device.security.quarantine.active);
    assert_eq!(device.quarantine_history.len(), 1);

    let device = env
        .set_device_quarantine(&operator, &fp("fp-bad"), false, None)
        .await
        .unwrap();
    assert!(!device.security.quarantine.active);
    assert_eq!(device.quarantine_history.len(), 2);

    let actions: Vec<String> = env
        .audit
        .entries()
        .iter()
        .map(|entry| entry.action_type.clone())
        .collect();
    assert!(actions.contains(&"device_quarantined".to_string()));
    assert!(actions.contains(&"device_released".to_string()));
}
