//! Coordinated-attack detection and cross-device correlation.
//!
//! The sweep runs every ten minutes under the `analysis:coordinated`
//! distributed lock so replicas never double-scan: fetch the activity
//! window, group by the composite {country, resolution, behavior
//! bucket, IP hash} key, flag dense low-trust/high-anomaly groups,
//! escalate groups with correlated members, cache the suspicion records
//! and notify admins.

use crate::constants::{
    COORDINATED_LOCK_RESOURCE, CORRELATION_CACHE_TTL_SECS, SUSPICION_CACHE_TTL_SECS,
};
use crate::environment::Environment;
use crate::providers::cache::cache_key;
use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use chrono::{DateTime, Duration, Utc};
use civicwatch_core::device::Device;
use civicwatch_core::error::Result;
use civicwatch_core::events::DomainEvent;
use civicwatch_core::geo;
use civicwatch_core::types::EventSeverity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Candidates fetched per correlation axis.
const CANDIDATES_PER_AXIS: usize = 50;

/// Correlation results kept per device.
const MAX_RELATED: usize = 20;

/// Minimum weighted score before a candidate counts as related.
const MIN_CORRELATION_SCORE: f64 = 30.0;

// ═══════════════════════════════════════════════════════════════════════
// Cross-Device Correlation
// ═══════════════════════════════════════════════════════════════════════

/// One correlated device with its evidence.
#[derive(Debug, Clone)]
pub struct CorrelationCandidate {
    /// The related device.
    pub device: Device,
    /// Weighted shared-characteristic score.
    pub score: f64,
    /// Human-readable shared characteristics.
    pub shared: Vec<String>,
}

/// Compact correlation summary, cached per target for 30 minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    /// Related fingerprints with their scores, descending.
    pub related: Vec<(String, f64)>,
    /// Union of shared characteristics.
    pub shared_characteristics: Vec<String>,
    /// Correlation confidence, 0–100 (the strongest candidate).
    pub confidence: f64,
    /// Mean trust of the related devices.
    pub related_trust_avg: Option<f64>,
}

/// Full correlation outcome. `related` is empty on a cache hit; the
/// summary is authoritative either way.
#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    /// Cached or freshly computed summary.
    pub summary: CorrelationSummary,
    /// Fresh candidates with full documents (empty on cache hit).
    pub related: Vec<CorrelationCandidate>,
}

/// Correlate a device against the population via four bounded queries:
/// network share, signature share, geographic proximity and behavioral
/// similarity.
///
/// # Errors
///
/// Returns store errors; cache failures fall through to recomputation.
pub async fn correlate_device<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
    target: &Device,
) -> Result<CorrelationOutcome>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let fp = target.fingerprint_id.as_str();
    let key = cache_key("device", &["correlation", fp]);
    if let Some(cached) = env.cache.get(&key).await {
        if let Ok(summary) = serde_json::from_str::<CorrelationSummary>(&cached) {
            return Ok(CorrelationOutcome {
                summary,
                related: Vec::new(),
            });
        }
    }

    let now = Utc::now();
    let mut pool: HashMap<String, Device> = HashMap::new();

    // Axis 1: network share.
    if let Some(ip_hash) = target.network.ip_hash.as_deref() {
        for device in env
            .devices
            .find_by_ip_hash(ip_hash, CANDIDATES_PER_AXIS)
            .await?
        {
            pool.insert(device.fingerprint_id.as_str().to_string(), device);
        }
    }

    // Axis 2: signature share.
    for device in env
        .devices
        .find_by_signature(
            target.signature.user_agent_hash.as_deref(),
            target.signature.screen_resolution.as_deref(),
            CANDIDATES_PER_AXIS,
        )
        .await?
    {
        pool.insert(device.fingerprint_id.as_str().to_string(), device);
    }

    // Axis 3: geographic proximity.
    if let Some(fix) = &target.location.last_known {
        for device in env
            .devices
            .find_near(
                fix.point,
                env.config.detector.proximity_radius_m,
                CANDIDATES_PER_AXIS,
            )
            .await?
        {
            pool.insert(device.fingerprint_id.as_str().to_string(), device);
        }
    }

    // Axis 4: behavioral similarity, last 24 hours.
    let behavior = target.behavior.human_behavior_score;
    for device in env
        .devices
        .find_by_behavior(
            (behavior - 10.0).max(0.0),
            (behavior + 10.0).min(100.0),
            now - Duration::hours(24),
            CANDIDATES_PER_AXIS,
        )
        .await?
    {
        pool.insert(device.fingerprint_id.as_str().to_string(), device);
    }

    pool.remove(fp);

    let mut candidates: Vec<CorrelationCandidate> = pool
        .into_values()
        .map(|device| {
            let (score, shared) = score_candidate(target, &device);
            CorrelationCandidate {
                device,
                score,
                shared,
            }
        })
        .filter(|candidate| candidate.score > MIN_CORRELATION_SCORE)
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(MAX_RELATED);

    let summary = summarize(&candidates);
    if let Ok(serialized) = serde_json::to_string(&summary) {
        env.cache
            .set(&key, &serialized, CORRELATION_CACHE_TTL_SECS)
            .await;
    }

    Ok(CorrelationOutcome {
        summary,
        related: candidates,
    })
}

/// Weighted shared-characteristic scoring.
fn score_candidate(target: &Device, candidate: &Device) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut shared = Vec::new();

    if target.network.ip_hash.is_some() && target.network.ip_hash == candidate.network.ip_hash {
        score += 40.0;
        shared.push("ip_hash".to_string());
    }
    if target.network.network_provider.is_some()
        && target.network.network_provider == candidate.network.network_provider
    {
        score += 10.0;
        shared.push("isp".to_string());
    }
    if target.signature.user_agent.is_some()
        && target.signature.user_agent == candidate.signature.user_agent
    {
        score += 20.0;
        shared.push("user_agent".to_string());
    }
    if target.signature.screen_resolution.is_some()
        && target.signature.screen_resolution == candidate.signature.screen_resolution
    {
        score += 10.0;
        shared.push("screen_resolution".to_string());
    }
    if (target.behavior.human_behavior_score - candidate.behavior.human_behavior_score).abs()
        < 10.0
    {
        score += 15.0;
        shared.push("behavior".to_string());
    }
    if let (Some(a), Some(b)) = (&target.location.last_known, &candidate.location.last_known) {
        let distance = geo::haversine_meters(a.point, b.point);
        let proximity = (15.0 - distance / 100.0).max(0.0);
        if proximity > 0.0 {
            score += proximity;
            shared.push("proximity".to_string());
        }
    }
    let activity_gap = (target.activity.last_seen - candidate.activity.last_seen)
        .num_seconds()
        .abs();
    if activity_gap < 300 {
        score += 10.0;
        shared.push("synchronized_activity".to_string());
    }

    (score, shared)
}

fn summarize(candidates: &[CorrelationCandidate]) -> CorrelationSummary {
    let related: Vec<(String, f64)> = candidates
        .iter()
        .map(|c| (c.device.fingerprint_id.as_str().to_string(), c.score))
        .collect();
    let mut shared_characteristics: Vec<String> = candidates
        .iter()
        .flat_map(|c| c.shared.iter().cloned())
        .collect();
    shared_characteristics.sort();
    shared_characteristics.dedup();

    let confidence = candidates
        .iter()
        .map(|c| c.score)
        .fold(0.0, f64::max)
        .clamp(0.0, 100.0);
    let related_trust_avg = if candidates.is_empty() {
        None
    } else {
        Some(
            candidates
                .iter()
                .map(|c| c.device.security.trust_score)
                .sum::<f64>()
                / candidates.len() as f64,
        )
    };

    CorrelationSummary {
        related,
        shared_characteristics,
        confidence,
        related_trust_avg,
    }
}

/// Fold a correlation outcome into the device document.
pub fn apply_correlation(device: &mut Device, outcome: &CorrelationOutcome, now: DateTime<Utc>) {
    let summary = &outcome.summary;
    device.correlation.related_devices = summary
        .related
        .iter()
        .filter_map(|(fp, _)| civicwatch_core::types::FingerprintId::new(fp.clone()).ok())
        .collect();
    device.correlation.shared_characteristics = summary.shared_characteristics.clone();
    device.correlation.confidence = summary.confidence;
    if summary.related_trust_avg.is_some() {
        device.correlation.related_trust_avg = summary.related_trust_avg;
    }
    device.correlation.last_update = now;
}

// ═══════════════════════════════════════════════════════════════════════
// Coordinated-Attack Sweep
// ═══════════════════════════════════════════════════════════════════════

/// One flagged group from a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspicionRecord {
    /// Composite pattern key, `{country}_{resolution}_{bucket}_{ip}`.
    pub pattern: String,
    /// Grouped submissions inside the window.
    pub device_count: u64,
    /// Unique devices in the group.
    pub unique_devices: usize,
    /// Group mean trust.
    pub mean_trust: f64,
    /// Group mean anomaly.
    pub mean_anomaly: f64,
    /// Members with correlation confidence above 50.
    pub correlated_devices: usize,
    /// Suspicion tier: critical when mean anomaly exceeds 80.
    pub suspicion: EventSeverity,
    /// When the sweep ran.
    pub detected_at: DateTime<Utc>,
}

/// Composite grouping key for a device.
fn pattern_key(device: &Device) -> String {
    let resolution = device
        .signature
        .screen_resolution
        .as_deref()
        .unwrap_or("unknown");
    // Behavior bucketed to the nearest 5 so near-identical bots group.
    let bucket = ((device.behavior.human_behavior_score / 5.0).round() * 5.0) as i64;
    let ip = device.network.ip_hash.as_deref().unwrap_or("noip");
    format!(
        "{}_{}_{}_{}",
        device.network.estimated_country, resolution, bucket, ip
    )
}

/// Run one coordinated-attack sweep.
///
/// Returns the flagged groups; an empty result also means another
/// replica holds the sweep lock.
///
/// # Errors
///
/// Returns store errors; cache and notifier failures are recovered.
pub async fn run_sweep<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
) -> Result<Vec<SuspicionRecord>>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let Some(lock) = env
        .cache
        .acquire_lock(
            COORDINATED_LOCK_RESOURCE,
            env.config.detector.lock_ttl_secs,
            env.config.cache.lock_retries,
        )
        .await
    else {
        tracing::debug!("Coordinated sweep skipped: lock contended");
        return Ok(Vec::new());
    };

    let result = sweep_inner(env).await;
    env.cache.release_lock(&lock).await;
    result
}

async fn sweep_inner<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
) -> Result<Vec<SuspicionRecord>>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let now = Utc::now();
    let since = now - env.config.detector.window;
    let active = env.devices.active_since(since, 0).await?;

    let mut groups: HashMap<String, Vec<&Device>> = HashMap::new();
    for device in &active {
        groups.entry(pattern_key(device)).or_default().push(device);
    }

    let mut records = Vec::new();
    for (pattern, members) in groups {
        if members.len() < env.config.detector.min_group_devices {
            continue;
        }

        let unique = members.len();
        let submissions: u64 = members
            .iter()
            .map(|d| u64::from(d.security.total_reports_submitted))
            .sum();
        let mean_trust =
            members.iter().map(|d| d.security.trust_score).sum::<f64>() / unique as f64;
        let mean_anomaly = members.iter().map(|d| d.anomaly.score).sum::<f64>() / unique as f64;

        if !(mean_trust < 40.0 || mean_anomaly > 60.0) {
            continue;
        }

        // Correlation escalation over the flagged group.
        let mut correlated = 0_usize;
        for member in &members {
            let outcome = correlate_device(env, member).await?;
            if outcome.summary.confidence > 50.0 {
                correlated += 1;
            }
        }
        let escalated = correlated > 0;

        let record = SuspicionRecord {
            pattern: pattern.clone(),
            device_count: submissions,
            unique_devices: unique,
            mean_trust,
            mean_anomaly,
            correlated_devices: correlated,
            suspicion: if mean_anomaly > 80.0 {
                EventSeverity::Critical
            } else {
                EventSeverity::High
            },
            detected_at: now,
        };

        if let Ok(serialized) = serde_json::to_string(&record) {
            env.cache
                .set(
                    &cache_key("security", &["coordinated", &pattern]),
                    &serialized,
                    SUSPICION_CACHE_TTL_SECS,
                )
                .await;
        }

        tracing::warn!(
            pattern = %record.pattern,
            unique = record.unique_devices,
            mean_trust = record.mean_trust,
            mean_anomaly = record.mean_anomaly,
            correlated,
            "Coordinated attack pattern flagged"
        );

        let event = DomainEvent::CoordinatedAttackDetected {
            pattern: record.pattern.clone(),
            device_count: usize::try_from(record.device_count).unwrap_or(usize::MAX),
            unique_devices: record.unique_devices,
            mean_trust: record.mean_trust,
            mean_anomaly: record.mean_anomaly,
            suspicion: record.suspicion,
            timestamp: now,
        };
        if let Err(error) = env.notifier.notify_admins(&event).await {
            tracing::warn!(error = %error, "Coordinated-attack notification failed");
        }

        // Mark members of escalated groups so the fast path sees them.
        if escalated {
            for member in &members {
                let fingerprint = member.fingerprint_id.clone();
                let result = env
                    .update_device_with(&fingerprint, |device| {
                        device.security.coordinated_attack_suspected = true;
                    })
                    .await;
                if let Err(error) = result {
                    tracing::warn!(%fingerprint, error = %error, "Failed to mark attack suspect");
                }
            }
        }

        records.push(record);
    }

    Ok(records)
}

/// Spawn the periodic sweep task (default every ten minutes).
#[must_use]
pub fn start_sweeper<C, P, D, R, N, A>(
    env: Environment<C, P, D, R, N, A>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let interval = env
            .config
            .detector
            .sweep_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(interval) => {
                    if let Err(error) = run_sweep(&env).await {
                        tracing::warn!(error = %error, "Coordinated sweep failed");
                    }
                    // The expiry reaper rides the same cadence.
                    if let Err(error) = env.reap_expired_quarantines().await {
                        tracing::warn!(error = %error, "Quarantine reap failed");
                    }
                }
            }
        }
    })
}
