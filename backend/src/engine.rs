//! Background processor: the asynchronous half of the scoring engine.
//!
//! The fast path runs inside entity pre-save hooks; everything expensive
//! lands on a priority queue built on the cache sorted-set primitive and
//! is drained here by per-tier worker pools. Deep analysis for a device
//! is cross-device correlation, the full anomaly rubric, threat-match
//! scoring and a bulk trust refresh of the correlated cluster.
//!
//! # Failure handling
//!
//! A failed job is re-pushed with a time penalty; after the configured
//! attempt budget it moves to a dead-letter list. A conflict with an
//! interactive write is treated as a failure (the interactive write
//! already re-requested analysis).
//!
//! # Shutdown
//!
//! Workers honor a watch-channel shutdown signal. In-flight devices get
//! their processing-in-progress flag cleared and their next scheduled
//! analysis pushed out five minutes; processing-related cache patterns
//! are cleared afterwards.

use crate::constants::{
    ANALYSIS_DEAD_LETTER_KEY, ANALYSIS_QUEUE_KEY, PROCESSING_CACHE_PATTERN,
};
use crate::detector;
use crate::environment::Environment;
use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::scoring;
use civicwatch_core::types::{AnalysisPriority, FingerprintId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One deep-analysis queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Target device.
    pub fingerprint_id: String,
    /// Analysis type label (`full`, `correlation`, `rescore`).
    pub analysis_type: String,
    /// When the job entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Processing attempts so far.
    pub attempts: u32,
}

/// Worker tier labels, sized from [`civicwatch_core::config::ScoringConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerTier {
    Emergency,
    Standard,
    Background,
    Analytics,
}

impl WorkerTier {
    const fn label(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Standard => "standard",
            Self::Background => "background",
            Self::Analytics => "analytics",
        }
    }
}

/// Handle over the running worker pools.
pub struct BackgroundProcessor {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl BackgroundProcessor {
    /// Spawn the per-tier worker pools against an environment.
    ///
    /// Emergency/standard/background workers drain the deep-analysis
    /// queue; analytics workers run periodic batch trust re-scoring
    /// over the suspicious-device listing.
    #[must_use]
    pub fn start<C, P, D, R, N, A>(env: Environment<C, P, D, R, N, A>) -> Self
    where
        C: CacheStore + Clone + Send + Sync + 'static,
        P: PrincipalStore + Clone + Send + Sync + 'static,
        D: DeviceStore + Clone + Send + Sync + 'static,
        R: ReportStore + Clone + Send + Sync + 'static,
        N: Notifier + Clone + Send + Sync + 'static,
        A: AuditSink + Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = Vec::new();

        let scoring_config = env.config.scoring.clone();
        let pools = [
            (WorkerTier::Emergency, scoring_config.emergency_workers),
            (WorkerTier::Standard, scoring_config.standard_workers),
            (WorkerTier::Background, scoring_config.background_workers),
        ];
        for (tier, count) in pools {
            for index in 0..count {
                let env = env.clone();
                let rx = shutdown_rx.clone();
                let in_flight = Arc::clone(&in_flight);
                handles.push(tokio::spawn(async move {
                    queue_worker(env, tier, index, rx, in_flight).await;
                }));
            }
        }

        for index in 0..scoring_config.analytics_workers {
            let env = env.clone();
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                analytics_worker(env, index, rx).await;
            }));
        }

        Self {
            shutdown_tx,
            handles,
            in_flight,
        }
    }

    /// Signal shutdown, join workers and run the handshake: clear
    /// in-flight processing flags, reschedule their analysis five
    /// minutes out, and clear processing-related cache patterns.
    pub async fn shutdown<C, P, D, R, N, A>(self, env: &Environment<C, P, D, R, N, A>)
    where
        C: CacheStore + Clone,
        P: PrincipalStore + Clone,
        D: DeviceStore + Clone,
        R: ReportStore + Clone,
        N: Notifier + Clone,
        A: AuditSink + Clone,
    {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }

        let in_flight: Vec<String> = {
            let guard = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.iter().cloned().collect()
        };

        let resume_at = Utc::now() + ChronoDuration::minutes(5);
        for raw in in_flight {
            let Ok(fingerprint) = FingerprintId::new(raw) else {
                continue;
            };
            let result = env
                .update_device_with(&fingerprint, |device| {
                    device.processing.analysis_in_progress = false;
                    device.processing.next_scheduled_analysis = Some(resume_at);
                })
                .await;
            if let Err(error) = result {
                tracing::warn!(%fingerprint, error = %error, "Shutdown handshake write failed");
            }
        }

        env.cache.delete_pattern(PROCESSING_CACHE_PATTERN).await;
        tracing::info!("Background processor shut down");
    }
}

/// Queue-draining worker loop.
async fn queue_worker<C, P, D, R, N, A>(
    env: Environment<C, P, D, R, N, A>,
    tier: WorkerTier,
    index: usize,
    mut shutdown: watch::Receiver<bool>,
    in_flight: Arc<Mutex<HashSet<String>>>,
) where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    tracing::debug!(tier = tier.label(), index, "Analysis worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = env
            .cache
            .zpopmin(ANALYSIS_QUEUE_KEY, env.config.scoring.batch_size)
            .await;

        if batch.is_empty() {
            // Idle: wait for work or shutdown.
            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(env.config.scoring.idle_poll_interval) => {}
            }
            continue;
        }

        for (member, _score) in batch {
            if *shutdown.borrow() {
                // Unprocessed work goes back verbatim.
                env.cache
                    .zadd(ANALYSIS_QUEUE_KEY, requeue_score(0), &member)
                    .await;
                continue;
            }

            let Ok(job) = serde_json::from_str::<AnalysisJob>(&member) else {
                tracing::warn!(member = %member, "Dropping undecodable analysis job");
                continue;
            };

            track(&in_flight, &job.fingerprint_id, true);
            let deadline = env.config.scoring.device_deadline;
            let outcome = tokio::time::timeout(deadline, process_job(&env, &job)).await;
            track(&in_flight, &job.fingerprint_id, false);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(
                        fingerprint = %job.fingerprint_id,
                        error = %error,
                        "Deep analysis failed"
                    );
                    retry_or_dead_letter(&env, job).await;
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        fingerprint = %job.fingerprint_id,
                        "Deep analysis exceeded its deadline"
                    );
                    retry_or_dead_letter(&env, job).await;
                }
            }
        }
    }
    tracing::debug!(tier = tier.label(), index, "Analysis worker stopped");
}

fn track(in_flight: &Arc<Mutex<HashSet<String>>>, fingerprint: &str, active: bool) {
    let mut guard = match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if active {
        guard.insert(fingerprint.to_string());
    } else {
        guard.remove(fingerprint);
    }
}

fn requeue_score(attempts: u32) -> f64 {
    // Penalized jobs sort behind fresh medium-priority work.
    let penalty_ms = i64::from(attempts) * 60_000;
    f64::from(AnalysisPriority::Medium.band()) * 1e13
        + (Utc::now().timestamp_millis() + penalty_ms) as f64
}

async fn retry_or_dead_letter<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
    mut job: AnalysisJob,
) where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    job.attempts += 1;
    let Ok(member) = serde_json::to_string(&job) else {
        return;
    };
    if job.attempts >= env.config.scoring.max_attempts {
        env.cache.lpush(ANALYSIS_DEAD_LETTER_KEY, &member).await;
        // Bounded dead-letter list; oldest entries fall off.
        env.cache.ltrim(ANALYSIS_DEAD_LETTER_KEY, 0, 999).await;
        tracing::error!(
            fingerprint = %job.fingerprint_id,
            attempts = job.attempts,
            "Analysis job dead-lettered"
        );
    } else {
        env.cache
            .zadd(ANALYSIS_QUEUE_KEY, requeue_score(job.attempts), &member)
            .await;
    }
}

/// Run deep analysis for one queued device.
async fn process_job<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
    job: &AnalysisJob,
) -> Result<()>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let fingerprint = FingerprintId::new(job.fingerprint_id.clone())?;
    let Some(mut device) = env.devices.find(&fingerprint).await? else {
        // Device vanished between enqueue and pop; nothing to do.
        return Ok(());
    };
    let now = Utc::now();

    device.processing.analysis_in_progress = true;

    // Cross-device correlation first: the trust formula blends against
    // the correlated cluster.
    let correlation = detector::correlate_device(env, &device).await?;
    detector::apply_correlation(&mut device, &correlation, now);

    // Full rubric.
    let analysis = scoring::analyze_device(&device, now);
    scoring::apply_deep_analysis(
        &mut device,
        &analysis,
        env.config.scoring.anomaly_smoothing_delta,
        now,
    );
    device.processing.next_scheduled_analysis = Some(now + ChronoDuration::hours(6));

    match env.save_device(device, false).await {
        Ok(_) => {}
        Err(CoreError::Conflict { .. }) => {
            // An interactive write won the race and re-requested
            // analysis itself; this result is stale, drop it.
            tracing::debug!(%fingerprint, "Deep-analysis result discarded after conflict");
            return Ok(());
        }
        Err(error) => return Err(error),
    }

    // Batch trust refresh over the correlated cluster.
    if !correlation.related.is_empty() {
        let updates: Vec<(FingerprintId, f64)> = correlation
            .related
            .iter()
            .map(|candidate| {
                (
                    candidate.device.fingerprint_id.clone(),
                    candidate.device.calculate_trust_score(now),
                )
            })
            .collect();
        let written = env.devices.bulk_update_trust(&updates).await?;
        tracing::debug!(%fingerprint, cluster = written, "Cluster trust refreshed");
    }

    Ok(())
}

/// Analytics worker: periodic batch trust re-scoring over the
/// suspicious-device listing.
async fn analytics_worker<C, P, D, R, N, A>(
    env: Environment<C, P, D, R, N, A>,
    index: usize,
    mut shutdown: watch::Receiver<bool>,
) where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    tracing::debug!(index, "Analytics worker started");
    let interval = env.config.detector.sweep_interval.to_std().unwrap_or(
        std::time::Duration::from_secs(600),
    );
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(interval) => {
                if let Err(error) = rescore_suspicious(&env).await {
                    tracing::warn!(error = %error, "Batch re-scoring failed");
                }
            }
        }
    }
    tracing::debug!(index, "Analytics worker stopped");
}

/// Recompute trust for the current suspicious set in one bulk write.
async fn rescore_suspicious<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
) -> Result<u64>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let now = Utc::now();
    let suspicious = env.devices.find_suspicious(100).await?;
    if suspicious.is_empty() {
        return Ok(0);
    }
    let updates: Vec<(FingerprintId, f64)> = suspicious
        .iter()
        .map(|device| {
            (
                device.fingerprint_id.clone(),
                device.calculate_trust_score(now),
            )
        })
        .collect();
    env.devices.bulk_update_trust(&updates).await
}
