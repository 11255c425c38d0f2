//! Submission gate: ingest classification and identity promotion.
//!
//! Every mutating request flows through here: rate limit → identity
//! resolution (bearer admin, device link, or a synthesized ephemeral
//! principal) → quarantine gate → ephemeral promotion → security stamp
//! → report pre-save → durable write → cache invalidation → event
//! emission. Failures after the durable report write are non-fatal
//! warnings; the report stays.

use crate::constants::{
    ADMIN_DASHBOARD_KEY, ADMIN_SECURITY_ANALYTICS_KEY, FLAGGED_REPORTS_KEY, NS_ADMIN, NS_REPORTS,
};
use crate::environment::Environment;
use crate::providers::cache::cache_key;
use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use chrono::Utc;
use civicwatch_core::device::{Device, DeviceSignature};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::events::DomainEvent;
use civicwatch_core::geo::GeoPoint;
use civicwatch_core::principal::Principal;
use civicwatch_core::report::{Report, SubmittedBy};
use civicwatch_core::types::{FingerprintId, ReportId, RiskTier, Severity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Transport-level context accompanying a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// `x-device-fingerprint` header, when present.
    pub fingerprint: Option<String>,
    /// Verified bearer principal handle, when present. Operator
    /// authentication happens upstream; the gate only consumes the
    /// already-verified handle.
    pub bearer_principal: Option<String>,
    /// Source IP, hashed before it touches any document.
    pub ip: Option<String>,
    /// Client-collected signature features, when present.
    pub signature: Option<DeviceSignature>,
}

/// Location block of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationInput {
    /// `[lng, lat]`.
    pub coordinates: Option<[f64; 2]>,
    /// Free-form address.
    pub address: Option<String>,
    /// Fix source (`gps`, `manual`, `ip`).
    pub source: Option<String>,
}

/// Report submission body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReportRequest {
    /// Incident type label.
    pub r#type: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// Location block.
    pub location: Option<LocationInput>,
    /// Severity 1–5.
    pub severity: Option<u8>,
    /// Media attachment references.
    #[serde(default)]
    pub media: Vec<String>,
    /// Submitter requested anonymity.
    #[serde(default = "default_true")]
    pub anonymous: bool,
    /// Opaque client behavior signature.
    pub behavior_signature: Option<serde_json::Value>,
}

const fn default_true() -> bool {
    true
}

/// Successful submission outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReportResponse {
    /// Assigned report id.
    pub id: ReportId,
    /// Every citizen submission enters the moderation queue.
    pub requires_review: bool,
}

/// Identity resolved for a request.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// The acting principal; may be ephemeral.
    pub principal: Principal,
    /// The acting device, when a fingerprint resolved to one.
    pub device: Option<Device>,
}

/// SHA-256 of an IP, truncated to 16 hex characters.
#[must_use]
pub fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

impl<C, P, D, R, N, A> Environment<C, P, D, R, N, A>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    // ═══════════════════════════════════════════════════════════════════
    // Identity Resolution
    // ═══════════════════════════════════════════════════════════════════

    /// Resolve the acting principal and device for a request.
    ///
    /// Order: a valid bearer handle decoding to an unlocked admin wins;
    /// else a persisted device's linked principal; else a synthesized
    /// ephemeral anonymous principal (in memory only).
    ///
    /// # Errors
    ///
    /// [`CoreError::AccountLocked`] for a locked bearer admin; store
    /// errors.
    pub async fn resolve_identity(&self, context: &RequestContext) -> Result<ResolvedIdentity> {
        let now = Utc::now();

        if let Some(handle) = &context.bearer_principal {
            let id = civicwatch_core::types::PrincipalId(handle.clone());
            if let Ok(principal) = self.principals.get(&id).await {
                if principal.admin().is_some() {
                    if principal.is_locked(now) {
                        let until = principal
                            .admin()
                            .and_then(|admin| admin.lock_until)
                            .unwrap_or(now);
                        return Err(CoreError::AccountLocked { until });
                    }
                    let device = match &context.fingerprint {
                        Some(raw) => {
                            let fingerprint = FingerprintId::new(raw.clone())?;
                            self.find_device_cached(&fingerprint).await?
                        }
                        None => None,
                    };
                    return Ok(ResolvedIdentity { principal, device });
                }
            }
        }

        if let Some(raw) = &context.fingerprint {
            let fingerprint = FingerprintId::new(raw.clone())?;
            if let Some(device) = self.find_device_cached(&fingerprint).await? {
                if let Some(principal_id) = &device.principal_id {
                    if let Ok(principal) = self.principals.get(principal_id).await {
                        return Ok(ResolvedIdentity {
                            principal,
                            device: Some(device),
                        });
                    }
                }
                // Linked principal missing: ephemeral for now, healed
                // at promotion time.
                return Ok(ResolvedIdentity {
                    principal: Principal::new_ephemeral(now),
                    device: Some(device),
                });
            }
        }

        Ok(ResolvedIdentity {
            principal: Principal::new_ephemeral(now),
            device: None,
        })
    }

    /// Refuse requests from quarantined sources, re-checking lazily so
    /// an expired quarantine self-heals on access.
    ///
    /// # Errors
    ///
    /// [`CoreError::Quarantined`] while the quarantine holds.
    pub async fn enforce_quarantine_gate(&self, identity: &mut ResolvedIdentity) -> Result<()> {
        let now = Utc::now();

        let was_active = identity.principal.security.quarantine.active;
        if identity.principal.is_quarantined(now) {
            return Err(CoreError::Quarantined {
                until: identity.principal.security.quarantine.until,
            });
        }
        // The lazy check clears an expired quarantine in memory; make
        // the healing durable for persistent principals.
        if was_active && !identity.principal.ephemeral {
            if let Err(error) = self.principals.update(&identity.principal).await {
                tracing::warn!(
                    principal_id = %identity.principal.id,
                    error = %error,
                    "Quarantine self-heal write failed"
                );
            }
        }

        if let Some(device) = &mut identity.device {
            let was_active = device.security.quarantine.active;
            if device.is_quarantined(now) {
                return Err(CoreError::Quarantined {
                    until: device.security.quarantine.until,
                });
            }
            if was_active {
                match self.devices.update(device).await {
                    Ok(saved) => *device = saved,
                    Err(error) => {
                        tracing::warn!(
                            fingerprint = %device.fingerprint_id,
                            error = %error,
                            "Quarantine self-heal write failed"
                        );
                    }
                }
                self.invalidate_device_cache(&device.fingerprint_id.clone()).await;
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Identity Promotion
    // ═══════════════════════════════════════════════════════════════════

    /// Promote an ephemeral principal to a persistent one, keyed by the
    /// device fingerprint: reuse the device's linked principal, heal a
    /// dangling link, or create both sides fresh. Exactly one persistent
    /// principal and device remain, linked bidirectionally.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn promote_ephemeral(
        &self,
        identity: ResolvedIdentity,
        context: &RequestContext,
    ) -> Result<ResolvedIdentity> {
        if !identity.principal.ephemeral {
            return Ok(identity);
        }
        let now = Utc::now();

        let Some(raw) = &context.fingerprint else {
            // No fingerprint to key on: persist a standalone anonymous
            // principal so the report has a durable owner.
            let mut principal = identity.principal;
            principal.ephemeral = false;
            principal.id = civicwatch_core::types::PrincipalId::new_anonymous(now);
            let principal = self.principals.insert(&principal).await?;
            return Ok(ResolvedIdentity {
                principal,
                device: None,
            });
        };
        let fingerprint = FingerprintId::new(raw.clone())?;

        // Serialize promotion per fingerprint across replicas.
        let lock = self
            .cache
            .acquire_lock(&format!("promotion:{fingerprint}"), 10, 3)
            .await;

        let result = self.promote_inner(&fingerprint, context, now).await;

        if let Some(lock) = lock {
            self.cache.release_lock(&lock).await;
        }
        result
    }

    async fn promote_inner(
        &self,
        fingerprint: &FingerprintId,
        context: &RequestContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<ResolvedIdentity> {
        if let Some(mut device) = self.devices.find(fingerprint).await? {
            // Device exists: reuse its principal or heal the link.
            if let Some(principal_id) = device.principal_id.clone() {
                if let Ok(principal) = self.principals.get(&principal_id).await {
                    return Ok(ResolvedIdentity {
                        principal,
                        device: Some(device),
                    });
                }
                tracing::warn!(
                    %fingerprint,
                    principal_id = %principal_id,
                    "Device linked to a missing principal; healing"
                );
            }

            let principal = self
                .principals
                .insert(&Principal::new_anonymous_from_device(
                    fingerprint.clone(),
                    now,
                ))
                .await?;
            device.principal_id = Some(principal.id.clone());
            let device = self.devices.update(&device).await?;
            return Ok(ResolvedIdentity {
                principal,
                device: Some(device),
            });
        }

        // Fresh fingerprint: create both sides and link them.
        let principal = self
            .principals
            .insert(&Principal::new_anonymous_from_device(
                fingerprint.clone(),
                now,
            ))
            .await?;

        let mut device = Device::new(fingerprint.clone(), now);
        device.principal_id = Some(principal.id.clone());
        if let Some(signature) = &context.signature {
            device.update_signature(signature.clone(), now);
            // First sight of the signature is baseline, not drift.
            device.previous_signature = None;
            device.anomaly.signature_drift_penalty = 0.0;
        }
        if let Some(ip) = &context.ip {
            device.network.ip_hash = Some(hash_ip(ip));
        }
        let device = self.insert_device(device).await?;

        tracing::info!(
            principal_id = %principal.id,
            %fingerprint,
            "Promoted ephemeral principal to persistent identity"
        );
        Ok(ResolvedIdentity {
            principal,
            device: Some(device),
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Report Submission
    // ═══════════════════════════════════════════════════════════════════

    /// Handle a report submission end to end.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingField`] / [`CoreError::InvalidValue`] for bad
    /// bodies, [`CoreError::RateLimited`], [`CoreError::Quarantined`],
    /// and store errors from the durable write.
    pub async fn submit_report(
        &self,
        request: SubmitReportRequest,
        context: RequestContext,
    ) -> Result<SubmitReportResponse> {
        let now = Utc::now();

        // Field validation before any IO.
        let incident_type = request
            .r#type
            .clone()
            .ok_or(CoreError::MissingField { field: "type" })?;
        let description = request
            .description
            .clone()
            .ok_or(CoreError::MissingField {
                field: "description",
            })?;
        let location = request.location.clone().ok_or(CoreError::MissingField {
            field: "location",
        })?;
        let coordinates = location.coordinates.ok_or(CoreError::MissingField {
            field: "location.coordinates",
        })?;
        let severity = Severity::new(request.severity.ok_or(CoreError::MissingField {
            field: "severity",
        })?)?;

        let point = GeoPoint::new(coordinates[0], coordinates[1]);
        if !point.is_valid() {
            return Err(CoreError::InvalidValue {
                field: "location.coordinates",
                reason: "coordinates out of range".to_string(),
            });
        }

        // Per-source ingest budget, checked before any classification.
        let limiter_id = context
            .fingerprint
            .clone()
            .or_else(|| context.ip.as_deref().map(hash_ip))
            .unwrap_or_else(|| "unknown".to_string());
        let window_secs =
            u64::try_from(self.config.gate.submission_window.num_seconds()).unwrap_or(600);
        let decision = self
            .cache
            .check_rate_limit(
                &cache_key("ratelimit", &["submit", &limiter_id]),
                self.config.gate.submission_limit,
                window_secs,
            )
            .await;
        if !decision.allowed {
            return Err(CoreError::RateLimited {
                retry_after: std::time::Duration::from_secs(window_secs),
            });
        }

        // Identity: resolve, gate, promote.
        let mut identity = self.resolve_identity(&context).await?;
        self.enforce_quarantine_gate(&mut identity).await?;
        let identity = self.promote_ephemeral(identity, &context).await?;

        let ip_hash = context.ip.as_deref().map(hash_ip);
        let device_id = identity
            .device
            .as_ref()
            .map(|device| device.fingerprint_id.clone());
        let submitter_trust = identity
            .device
            .as_ref()
            .map(|device| device.security.trust_score);

        // Build and classify the report.
        let mut report = Report::new(
            incident_type,
            description,
            point,
            location.address,
            location.source.unwrap_or_else(|| "manual".to_string()),
            severity,
            SubmittedBy {
                principal_id: identity.principal.id.clone(),
                role: identity.principal.role(),
                device_id: device_id.clone(),
                ip_hash: ip_hash.clone(),
                anonymous: request.anonymous,
            },
            now,
        );
        report.media = request.media;
        report.behavior_signature = request.behavior_signature;
        report.run_presave(submitter_trust);

        // Device bookkeeping ahead of the durable write: the pre-save
        // chain runs inside update_device_with.
        if let Some(fingerprint) = &device_id {
            let spam = report.security_flags.potential_spam;
            let cross_border = report.security_flags.cross_border_report;
            let signature = context.signature.clone();
            let ip_hash_for_device = ip_hash.clone();
            let result = self
                .update_device_with(fingerprint, move |device| {
                    device.update_activity(now);
                    device.mark_report_submitted();
                    if spam {
                        device.mark_spam_report();
                    }
                    if cross_border {
                        device.location.cross_border_activity = true;
                    }
                    if let Some(ip_hash) = &ip_hash_for_device {
                        device.network.ip_hash = Some(ip_hash.clone());
                    }
                    if let Some(signature) = signature.clone() {
                        device.update_signature(signature, now);
                    }
                })
                .await;
            if let Err(error) = result {
                tracing::warn!(%fingerprint, error = %error, "Device bookkeeping failed");
            }
        }

        // Durable write.
        let report = self.reports.insert(&report).await?;

        // Enqueue on the tier queue for the distributed phases.
        self.queue_report_for_processing(&report).await;

        // Post-save side effects are non-fatal from here on.
        self.cache.delete(ADMIN_DASHBOARD_KEY).await;
        self.cache.delete(ADMIN_SECURITY_ANALYTICS_KEY).await;
        self.cache.delete(FLAGGED_REPORTS_KEY).await;
        self.cache.bump_version(NS_REPORTS).await;
        self.cache.bump_version(NS_ADMIN).await;

        let event = DomainEvent::NewPendingReport {
            report_id: report.id,
            incident_type: report.incident_type.clone(),
            severity: report.severity,
            location: report.location.public_point,
            priority: report.moderation.priority_level,
            security_score: report.security_flags.security_score,
            timestamp: report.timestamp,
        };
        if let Err(error) = self.notifier.notify_admins(&event).await {
            tracing::warn!(error = %error, "new_pending_report notification failed");
        }

        // Keep the principal's association current.
        if let (Some(fingerprint), false) = (&device_id, identity.principal.ephemeral) {
            let mut principal = identity.principal.clone();
            let trust_tier = identity
                .device
                .as_ref()
                .map_or(RiskTier::Medium, |device| device.security.risk_tier);
            let device_type = identity
                .device
                .as_ref()
                .map_or_else(Default::default, |device| device.network.device_type);
            let primary_changed = principal.add_device_association(
                fingerprint.clone(),
                device_type,
                trust_tier,
                false,
                now,
            );
            principal.run_presave(primary_changed, submitter_trust, now);
            if principal.is_high_risk() {
                tracing::warn!(
                    principal_id = %principal.id,
                    risk = principal.security.risk_tier.as_str(),
                    "High-risk principal active"
                );
            }
            if let Err(error) = self.principals.update(&principal).await {
                tracing::warn!(principal_id = %principal.id, error = %error, "Principal touch failed");
            }
        }

        tracing::info!(
            report_id = %report.id,
            role = identity.principal.role().as_str(),
            principal_id = %identity.principal.id,
            "Report accepted"
        );

        Ok(SubmitReportResponse {
            id: report.id,
            requires_review: true,
        })
    }

    /// Insert the report on its tier's sorted-set queue.
    async fn queue_report_for_processing(&self, report: &Report) {
        let queue = report.processing.distributed.queue_name.clone();
        let member = report.id.to_string();
        let queued = self
            .cache
            .zadd(
                &cache_key("queue", &[&queue]),
                report.queue_score(),
                &member,
            )
            .await;
        if !queued {
            tracing::warn!(report_id = %report.id, "Report queue insert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_hash_is_truncated_sha256() {
        let hash = hash_ip("203.0.113.7");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_ip("203.0.113.7"));
        assert_ne!(hash, hash_ip("203.0.113.8"));
    }
}
