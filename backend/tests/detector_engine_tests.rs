//! Coordinated-attack detector, cross-device correlation and background
//! processor integration tests.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use civicwatch_backend::constants::ANALYSIS_QUEUE_KEY;
use civicwatch_backend::detector;
use civicwatch_backend::engine::BackgroundProcessor;
use civicwatch_backend::environment::MockEnvironment;
use civicwatch_backend::gate::{LocationInput, RequestContext, SubmitReportRequest};
use civicwatch_backend::providers::{CacheStore, DeviceStore};
use civicwatch_core::device::{Device, DeviceSignature};
use civicwatch_core::geo::GeoPoint;
use civicwatch_core::types::{EventSeverity, FingerprintId};

fn fp(raw: &str) -> FingerprintId {
    FingerprintId::new(raw).unwrap()
}

/// A device shaped like one bot of a coordinated cluster.
fn cluster_device(name: &str, behavior: f64, trust: f64, anomaly: f64) -> Device {
    let now = Utc::now();
    let mut device = Device::new(fp(name), now);
    device.signature.screen_resolution = Some("1920x1080".to_string());
    device.signature.user_agent = Some("Mozilla/5.0 (X11; Linux x86_64)".to_string());
    device.signature.rehash_user_agent();
    device.network.ip_hash = Some("h".to_string());
    device.behavior.human_behavior_score = behavior;
    device.security.trust_score = trust;
    device.anomaly.score = anomaly;
    device.security.total_reports_submitted = 2;
    device.activity.last_seen = now;
    device
}

#[tokio::test]
async fn three_similar_low_trust_devices_are_flagged() {
    let env = MockEnvironment::mocked();
    for (name, behavior) in [("fp-1", 33.0), ("fp-2", 35.0), ("fp-3", 37.0)] {
        env.devices
            .insert(&cluster_device(name, behavior, 20.0, 0.0))
            .await
            .unwrap();
    }

    let records = detector::run_sweep(&env).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.pattern, "BD_1920x1080_35_h");
    assert_eq!(record.device_count, 6);
    assert_eq!(record.unique_devices, 3);
    assert_eq!(record.suspicion, EventSeverity::High);
    assert!(record.mean_trust < 40.0);
    // Shared IP, UA, resolution and behavior correlate the cluster.
    assert_eq!(record.correlated_devices, 3);

    assert!(env
        .notifier
        .event_names()
        .contains(&"coordinated_attack_detected"));

    // Escalated members are marked for the fast path.
    let device = env.devices.get(&fp("fp-1")).await.unwrap();
    assert!(device.security.coordinated_attack_suspected);
}

#[tokio::test]
async fn two_devices_never_form_a_group() {
    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2"] {
        env.devices
            .insert(&cluster_device(name, 35.0, 20.0, 0.0))
            .await
            .unwrap();
    }
    let records = detector::run_sweep(&env).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn boundary_trust_39_flags_41_does_not_without_anomaly() {
    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2", "fp-3"] {
        env.devices
            .insert(&cluster_device(name, 35.0, 39.0, 0.0))
            .await
            .unwrap();
    }
    assert_eq!(detector::run_sweep(&env).await.unwrap().len(), 1);

    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2", "fp-3"] {
        env.devices
            .insert(&cluster_device(name, 35.0, 41.0, 0.0))
            .await
            .unwrap();
    }
    assert!(detector::run_sweep(&env).await.unwrap().is_empty());
}

#[tokio::test]
async fn boundary_trust_41_with_anomaly_61_flags() {
    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2", "fp-3"] {
        env.devices
            .insert(&cluster_device(name, 35.0, 41.0, 61.0))
            .await
            .unwrap();
    }
    let records = detector::run_sweep(&env).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].mean_anomaly > 60.0);
}

#[tokio::test]
async fn mean_anomaly_above_80_is_critical() {
    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2", "fp-3"] {
        env.devices
            .insert(&cluster_device(name, 35.0, 41.0, 85.0))
            .await
            .unwrap();
    }
    let records = detector::run_sweep(&env).await.unwrap();
    assert_eq!(records[0].suspicion, EventSeverity::Critical);
}

#[tokio::test]
async fn stale_devices_fall_outside_the_window() {
    let env = MockEnvironment::mocked();
    for name in ["fp-1", "fp-2", "fp-3"] {
        let mut device = cluster_device(name, 35.0, 20.0, 0.0);
        device.activity.last_seen = Utc::now() - Duration::hours(2);
        env.devices.insert(&device).await.unwrap();
    }
    assert!(detector::run_sweep(&env).await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_lock_prevents_concurrent_sweeps() {
    let env = MockEnvironment::mocked();
    for (name, behavior) in [("fp-1", 33.0), ("fp-2", 35.0), ("fp-3", 37.0)] {
        env.devices
            .insert(&cluster_device(name, behavior, 20.0, 0.0))
            .await
            .unwrap();
    }

    let held = env
        .cache
        .acquire_lock("analysis:coordinated", 30, 1)
        .await
        .unwrap();
    assert!(detector::run_sweep(&env).await.unwrap().is_empty());
    env.cache.release_lock(&held).await;
    assert_eq!(detector::run_sweep(&env).await.unwrap().len(), 1);
}

#[tokio::test]
async fn correlation_scores_weighted_characteristics() {
    let env = MockEnvironment::mocked();
    let target = cluster_device("fp-t", 35.0, 50.0, 0.0);
    let twin = cluster_device("fp-twin", 38.0, 50.0, 0.0);
    // A distant stranger sharing nothing scoreable but behavior.
    let mut stranger = Device::new(fp("fp-stranger"), Utc::now());
    stranger.behavior.human_behavior_score = 36.0;
    stranger.activity.last_seen = Utc::now();

    env.devices.insert(&target).await.unwrap();
    env.devices.insert(&twin).await.unwrap();
    env.devices.insert(&stranger).await.unwrap();

    let outcome = detector::correlate_device(&env, &target).await.unwrap();
    // ip 40 + ua 20 + resolution 10 + behavior 15 + synchronized 10 = 95.
    let twin_entry = outcome
        .summary
        .related
        .iter()
        .find(|(name, _)| name == "fp-twin")
        .unwrap();
    assert!((twin_entry.1 - 95.0).abs() < f64::EPSILON);
    assert!(outcome.summary.confidence >= 95.0);

    // behavior 15 + synchronized 10 = 25 < 30: the stranger is out.
    assert!(!outcome
        .summary
        .related
        .iter()
        .any(|(name, _)| name == "fp-stranger"));
}

#[tokio::test]
async fn correlation_proximity_decays_with_distance() {
    let env = MockEnvironment::mocked();
    let now = Utc::now();

    let mut target = Device::new(fp("fp-t"), now);
    target.location.last_known = Some(civicwatch_core::device::LocationFix {
        point: GeoPoint::new(90.4100, 23.8100),
        timestamp: now,
        accuracy_m: 10.0,
    });
    // Roughly 500 m north.
    let mut near = Device::new(fp("fp-near"), now);
    near.location.last_known = Some(civicwatch_core::device::LocationFix {
        point: GeoPoint::new(90.4100, 23.8145),
        timestamp: now,
        accuracy_m: 10.0,
    });
    // Make the pair clear the relation threshold through behavior+sync.
    target.behavior.human_behavior_score = 50.0;
    near.behavior.human_behavior_score = 50.0;
    target.signature.user_agent = Some("UA".to_string());
    near.signature.user_agent = Some("UA".to_string());

    env.devices.insert(&target).await.unwrap();
    env.devices.insert(&near).await.unwrap();

    let outcome = detector::correlate_device(&env, &target).await.unwrap();
    let entry = outcome
        .summary
        .related
        .iter()
        .find(|(name, _)| name == "fp-near")
        .unwrap();
    // ua 20 + behavior 15 + sync 10 + proximity (15 - ~500/100) ≈ 55.
    assert!(entry.1 > 50.0 && entry.1 < 60.0, "got {}", entry.1);
}

#[tokio::test]
async fn correlation_results_are_cached_per_target() {
    let env = MockEnvironment::mocked();
    let target = cluster_device("fp-t", 35.0, 50.0, 0.0);
    let twin = cluster_device("fp-twin", 35.0, 50.0, 0.0);
    env.devices.insert(&target).await.unwrap();
    env.devices.insert(&twin).await.unwrap();

    let first = detector::correlate_device(&env, &target).await.unwrap();
    assert!(!first.related.is_empty());

    // Second run answers from cache: summary intact, documents absent.
    let second = detector::correlate_device(&env, &target).await.unwrap();
    assert_eq!(second.summary, first.summary);
    assert!(second.related.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Background Processor
// ═══════════════════════════════════════════════════════════════════════

fn submission(description: &str) -> SubmitReportRequest {
    SubmitReportRequest {
        r#type: Some("theft".to_string()),
        description: Some(description.to_string()),
        location: Some(LocationInput {
            coordinates: Some([90.41, 23.81]),
            address: None,
            source: Some("gps".to_string()),
        }),
        severity: Some(3),
        media: Vec::new(),
        anonymous: true,
        behavior_signature: None,
    }
}

#[tokio::test]
async fn signature_change_requests_high_priority_analysis() {
    let env = MockEnvironment::mocked();

    // First contact with the original user agent.
    let mut context = RequestContext {
        fingerprint: Some("fp-B".to_string()),
        bearer_principal: None,
        ip: Some("203.0.113.5".to_string()),
        signature: Some(DeviceSignature {
            user_agent: Some("UA-original".to_string()),
            platform: Some("Linux".to_string()),
            ..DeviceSignature::default()
        }),
    };
    env.submit_report(submission("First report from this device"), context.clone())
        .await
        .unwrap();
    // Drain whatever the first save enqueued.
    env.cache.zpopmin(ANALYSIS_QUEUE_KEY, 100).await;

    // Mid-session user-agent change.
    context.signature = Some(DeviceSignature {
        user_agent: Some("UA-changed".to_string()),
        platform: Some("Linux".to_string()),
        ..DeviceSignature::default()
    });
    env.submit_report(submission("Second report, new user agent"), context)
        .await
        .unwrap();

    let device = env.devices.get(&fp("fp-B")).await.unwrap();
    let snapshot = device.previous_signature.clone().unwrap();
    assert_eq!(snapshot.user_agent.as_deref(), Some("UA-original"));
    assert_eq!(device.anomaly.score, 10.0);
    assert!(device.anomaly.needs_detailed_analysis);

    // Queued at the high-priority band.
    let jobs = env.cache.zpopmin(ANALYSIS_QUEUE_KEY, 10).await;
    assert!(!jobs.is_empty());
    let (member, score) = &jobs[0];
    assert!(member.contains("fp-B"));
    assert!(*score < 2e13, "expected the high band, got {score}");
}

#[tokio::test]
async fn processor_drains_the_queue_and_clears_the_request() {
    let mut env = MockEnvironment::mocked();
    env.config.scoring.idle_poll_interval = std::time::Duration::from_millis(20);

    let context = RequestContext {
        fingerprint: Some("fp-B".to_string()),
        bearer_principal: None,
        ip: Some("203.0.113.5".to_string()),
        signature: None,
    };
    env.submit_report(submission("Report queueing deep analysis"), context)
        .await
        .unwrap();
    assert!(env.cache.zcard(ANALYSIS_QUEUE_KEY).await > 0);

    let processor = BackgroundProcessor::start(env.clone());
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    processor.shutdown(&env).await;

    assert_eq!(env.cache.zcard(ANALYSIS_QUEUE_KEY).await, 0);
    let device = env.devices.get(&fp("fp-B")).await.unwrap();
    assert!(!device.anomaly.needs_detailed_analysis);
    assert!(device.processing.last_detailed_analysis.is_some());
    assert!(device.processing.next_scheduled_analysis.is_some());
    assert!(!device.processing.analysis_in_progress);
}

#[tokio::test]
async fn undecodable_jobs_are_dropped_not_looped() {
    let mut env = MockEnvironment::mocked();
    env.config.scoring.idle_poll_interval = std::time::Duration::from_millis(20);
    env.cache.zadd(ANALYSIS_QUEUE_KEY, 0.0, "not-json").await;

    let processor = BackgroundProcessor::start(env.clone());
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    processor.shutdown(&env).await;

    assert_eq!(env.cache.zcard(ANALYSIS_QUEUE_KEY).await, 0);
}

#[tokio::test]
async fn deep_analysis_respects_the_smoothing_invariant() {
    let mut env = MockEnvironment::mocked();
    env.config.scoring.idle_poll_interval = std::time::Duration::from_millis(20);

    // A device whose rubric target is far above its current score.
    let mut device = Device::new(fp("fp-hot"), Utc::now());
    device.network.tor_detected = true;
    device.network.vpn_suspected = true;
    device.behavior.human_behavior_score = 10.0;
    device.location.cross_border_activity = true;
    device.location.location_jumps = 5;
    device.anomaly.previous_score = 0.0;
    env.devices.insert(&device).await.unwrap();
    env.enqueue_deep_analysis(
        &fp("fp-hot"),
        civicwatch_core::types::AnalysisPriority::High,
        "full",
    )
    .await;

    let processor = BackgroundProcessor::start(env.clone());
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    processor.shutdown(&env).await;

    let after = env.devices.get(&fp("fp-hot")).await.unwrap();
    // Rubric target is 70+, but one pass moves the score at most 15,
    // and the follow-up save may add one more smoothing step.
    assert!(after.anomaly.score <= 30.0);
    assert!(after.anomaly.score > 0.0);
}
