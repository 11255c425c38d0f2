//! Device service: cached lookup, save pipeline, queue hand-off.
//!
//! Every device write funnels through [`Environment::update_device_with`]
//! so the pre-save fast path (trust → risk → anomaly smoothing → alerts
//! → quarantine predicate) runs exactly once per save, optimistic
//! conflicts retry bounded, and post-save side effects (cache
//! invalidation, deep-analysis enqueue, high-risk notification) never
//! fail the request.

use crate::constants::{
    ANALYSIS_QUEUE_KEY, DEVICE_CACHE_TTL_SECS, TRUST_CACHE_TTL_SECS,
};
use crate::engine::AnalysisJob;
use crate::environment::Environment;
use crate::providers::cache::cache_key;
use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use chrono::Utc;
use civicwatch_core::device::{Device, PresaveOutcome};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::events::DomainEvent;
use civicwatch_core::types::{AnalysisPriority, FingerprintId};

/// Store-conflict retries before a device write fails.
const CONFLICT_RETRIES: u32 = 3;

impl<C, P, D, R, N, A> Environment<C, P, D, R, N, A>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    /// Find a device by fingerprint, reading through the cache (1 h TTL).
    ///
    /// Cache failures fall through to the authoritative store.
    ///
    /// # Errors
    ///
    /// Returns store errors; an unknown fingerprint is `Ok(None)`.
    pub async fn find_device_cached(
        &self,
        fingerprint: &FingerprintId,
    ) -> Result<Option<Device>> {
        let key = cache_key("device", &["fingerprint", fingerprint.as_str()]);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Device>(&cached) {
                Ok(device) => return Ok(Some(device)),
                Err(error) => {
                    // Poisoned entry; drop it and fall through.
                    tracing::warn!(%fingerprint, error = %error, "Evicting undecodable device cache entry");
                    self.cache.delete(&key).await;
                }
            }
        }

        let device = self.devices.find(fingerprint).await?;
        if let Some(device) = &device {
            if let Ok(serialized) = serde_json::to_string(device) {
                self.cache.set(&key, &serialized, DEVICE_CACHE_TTL_SECS).await;
            }
        }
        Ok(device)
    }

    /// Invalidate every cache entry derived from a device.
    pub async fn invalidate_device_cache(&self, fingerprint: &FingerprintId) {
        let fp = fingerprint.as_str();
        self.cache
            .delete(&cache_key("device", &["fingerprint", fp]))
            .await;
        self.cache.delete(&cache_key("device", &["trust", fp])).await;
        self.cache
            .delete(&cache_key("device", &["correlation", fp]))
            .await;
        self.cache
            .delete(&cache_key("security", &["analysis", fp]))
            .await;
        self.cache
            .delete_pattern(&cache_key("device", &[fp, "*"]))
            .await;
    }

    /// Trust score with a 5-minute cache in front of the evaluation.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown fingerprints; store errors.
    pub async fn cached_trust_score(&self, fingerprint: &FingerprintId) -> Result<f64> {
        let key = cache_key("device", &["trust", fingerprint.as_str()]);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(score) = cached.parse::<f64>() {
                return Ok(score);
            }
        }

        let device = self.devices.get(fingerprint).await?;
        let score = device.calculate_trust_score(Utc::now());
        self.cache
            .set(&key, &score.to_string(), TRUST_CACHE_TTL_SECS)
            .await;
        Ok(score)
    }

    /// Insert a brand-new device, running the pre-save chain first.
    ///
    /// # Errors
    ///
    /// Returns store errors (including fingerprint collisions).
    pub async fn insert_device(&self, mut device: Device) -> Result<Device> {
        let outcome = device.run_presave(
            true,
            self.config.scoring.anomaly_smoothing_delta,
            self.config.quarantine.default_duration,
            Utc::now(),
        );
        let saved = self.devices.insert(&device).await?;
        self.device_post_save(&saved, outcome).await;
        Ok(saved)
    }

    /// Load, mutate and save a device with the full pre-save chain.
    ///
    /// The mutation closure re-runs on optimistic conflicts (at most
    /// three attempts), so it must be idempotent over a fresh snapshot.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown fingerprints;
    /// [`CoreError::Conflict`] once the retry budget is exhausted.
    pub async fn update_device_with<F>(
        &self,
        fingerprint: &FingerprintId,
        mutate: F,
    ) -> Result<(Device, PresaveOutcome)>
    where
        F: Fn(&mut Device),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut device = self.devices.get(fingerprint).await?;
            mutate(&mut device);
            let outcome = device.run_presave(
                true,
                self.config.scoring.anomaly_smoothing_delta,
                self.config.quarantine.default_duration,
                Utc::now(),
            );

            match self.devices.update(&device).await {
                Ok(saved) => {
                    self.device_post_save(&saved, outcome).await;
                    return Ok((saved, outcome));
                }
                Err(CoreError::Conflict { .. }) if attempt < CONFLICT_RETRIES => {
                    tracing::debug!(%fingerprint, attempt, "Device write conflict, retrying");
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Save an already-mutated device (no closure re-application). Used
    /// by the background processor, which must not clobber interactive
    /// writes: conflicts surface to the caller after one attempt.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] on a stale revision; store errors.
    pub async fn save_device(
        &self,
        mut device: Device,
        anomaly_inputs_changed: bool,
    ) -> Result<(Device, PresaveOutcome)> {
        let outcome = device.run_presave(
            anomaly_inputs_changed,
            self.config.scoring.anomaly_smoothing_delta,
            self.config.quarantine.default_duration,
            Utc::now(),
        );
        let saved = self.devices.update(&device).await?;
        self.device_post_save(&saved, outcome).await;
        Ok((saved, outcome))
    }

    /// Post-save side effects. Never fails the request.
    async fn device_post_save(&self, device: &Device, outcome: PresaveOutcome) {
        self.invalidate_device_cache(&device.fingerprint_id).await;

        if let Some(priority) = outcome.analysis_requested {
            self.enqueue_deep_analysis(&device.fingerprint_id, priority, "full")
                .await;
        }

        if outcome.high_risk {
            tracing::warn!(
                fingerprint = %device.fingerprint_id,
                risk = device.security.risk_tier.as_str(),
                trust = device.security.trust_score,
                "High-risk device detected"
            );
            let event = DomainEvent::HighRiskDevice {
                fingerprint_id: device.fingerprint_id.clone(),
                principal_id: device.principal_id.clone(),
                risk_tier: device.security.risk_tier,
                trust_score: device.security.trust_score,
                timestamp: Utc::now(),
            };
            if let Err(error) = self.notifier.notify_admins(&event).await {
                tracing::warn!(error = %error, "High-risk notification failed");
            }
        }

        if outcome.newly_quarantined {
            tracing::warn!(
                fingerprint = %device.fingerprint_id,
                reason = device.security.quarantine.reason.as_deref().unwrap_or(""),
                "Device auto-quarantined"
            );
        }
    }

    /// Enqueue a device for deep analysis on the priority queue. Enqueue
    /// failures are logged and swallowed; the next save retries.
    pub async fn enqueue_deep_analysis(
        &self,
        fingerprint: &FingerprintId,
        priority: AnalysisPriority,
        analysis_type: &str,
    ) -> bool {
        let job = AnalysisJob {
            fingerprint_id: fingerprint.as_str().to_string(),
            analysis_type: analysis_type.to_string(),
            enqueued_at: Utc::now(),
            attempts: 0,
        };
        let Ok(member) = serde_json::to_string(&job) else {
            return false;
        };
        let score =
            f64::from(priority.band()) * 1e13 + job.enqueued_at.timestamp_millis() as f64;
        let queued = self.cache.zadd(ANALYSIS_QUEUE_KEY, score, &member).await;
        if !queued {
            tracing::warn!(%fingerprint, "Deep-analysis enqueue failed; next save will retry");
        }
        queued
    }
}
