//! Moderation service: role-gated status transitions and community
//! validation.
//!
//! Moderation writes fail loudly with the offending invariant named;
//! stale writes lose the optimistic race and retry against a fresh
//! snapshot. Community validation applies the automation rules: an
//! approved report with enough positive validators and high community
//! trust becomes verified; enough negatives (or collapsed trust) push
//! it back to review.

use crate::constants::{
    ADMIN_DASHBOARD_KEY, ADMIN_SECURITY_ANALYTICS_KEY, FLAGGED_REPORTS_KEY, NS_ADMIN, NS_REPORTS,
};
use crate::environment::Environment;
use crate::gate::RequestContext;
use crate::providers::cache::cache_key;
use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use chrono::Utc;
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::events::{AuditEntry, AuditOutcome, AuditTarget, DomainEvent};
use civicwatch_core::principal::{Permission, Principal};
use civicwatch_core::report::{Report, ReportStatus};
use civicwatch_core::types::{EventSeverity, ReportId};
use serde::{Deserialize, Serialize};

/// Store-conflict retries before a moderation write fails.
const CONFLICT_RETRIES: u32 = 3;

/// Outcome of a community validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Status after the validation (automation may have moved it).
    pub status: ReportStatus,
    /// Community trust after the validation.
    pub community_trust: f64,
    /// Positive count.
    pub positive: u32,
    /// Negative count.
    pub negative: u32,
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
    /// Load-mutate-save a report with bounded optimistic retries.
    ///
    /// The mutation must be re-applicable against a fresh snapshot.
    async fn update_report_with<F>(&self, id: ReportId, mutate: F) -> Result<Report>
    where
        F: Fn(&mut Report) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut report = self.reports.get(id).await?;
            mutate(&mut report)?;
            match self.reports.update(&report).await {
                Ok(saved) => return Ok(saved),
                Err(CoreError::Conflict { .. }) if attempt < CONFLICT_RETRIES => {
                    tracing::debug!(report_id = %id, attempt, "Report write conflict, retrying");
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Moderator-driven status change.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without the moderation permission,
    /// [`CoreError::InvalidTransition`] naming the violated invariant,
    /// [`CoreError::NotFound`] / store errors otherwise.
    pub async fn change_report_status(
        &self,
        moderator: &Principal,
        report_id: ReportId,
        new_status: ReportStatus,
        reason: Option<String>,
    ) -> Result<Report> {
        if !moderator.has_permission(Permission::Moderation) {
            return Err(CoreError::ForbiddenRole {
                required: "moderation".to_string(),
            });
        }
        let now = Utc::now();
        let moderator_handle = moderator
            .admin()
            .map_or_else(|| moderator.id.to_string(), |admin| admin.username.clone());

        let old_status = self.reports.get(report_id).await?.status;
        let handle = moderator_handle.clone();
        let reason_for_mutate = reason.clone();
        let report = self
            .update_report_with(report_id, move |report| {
                report.apply_moderator_status(
                    new_status,
                    handle.clone(),
                    reason_for_mutate.clone(),
                    now,
                )
            })
            .await?;

        // Feed the moderation outcome back into the submitting device's
        // abuse history.
        if let Some(fingerprint) = report.submitted_by.device_id.clone() {
            let approved = matches!(new_status, ReportStatus::Approved);
            let counted = matches!(
                new_status,
                ReportStatus::Approved | ReportStatus::Rejected | ReportStatus::Flagged
            );
            if counted {
                let result = self
                    .update_device_with(&fingerprint, move |device| match new_status {
                        ReportStatus::Flagged => device.security.flagged_reports += 1,
                        _ => device.mark_moderation_outcome(approved),
                    })
                    .await;
                if let Err(error) = result {
                    tracing::warn!(%fingerprint, error = %error, "Abuse-history update failed");
                }
            }
        }

        self.invalidate_report_caches(report_id).await;
        self.emit_moderation_event(&report, old_status).await;

        self.record_audit(
            moderator,
            "report_status_change",
            AuditTarget::Report(report_id),
            serde_json::json!({
                "old_status": old_status.as_str(),
                "new_status": new_status.as_str(),
                "reason": reason,
            }),
            EventSeverity::Medium,
        )
        .await;

        tracing::info!(
            report_id = %report_id,
            old_status = old_status.as_str(),
            new_status = new_status.as_str(),
            moderator = %moderator_handle,
            "Report status changed"
        );
        Ok(report)
    }

    /// Moderator-only terminal deletion.
    ///
    /// # Errors
    ///
    /// As [`Environment::change_report_status`].
    pub async fn delete_report(
        &self,
        moderator: &Principal,
        report_id: ReportId,
    ) -> Result<Report> {
        self.change_report_status(moderator, report_id, ReportStatus::Deleted, None)
            .await
    }

    /// Community validation of a report.
    ///
    /// Rejects self-validation and duplicate validation from the same
    /// device, applies the counters, and runs the automation rules.
    ///
    /// # Errors
    ///
    /// [`CoreError::SelfValidation`], [`CoreError::DuplicateValidation`],
    /// [`CoreError::Quarantined`], [`CoreError::NotFound`], store errors.
    pub async fn validate_report(
        &self,
        report_id: ReportId,
        is_positive: bool,
        context: &RequestContext,
    ) -> Result<ValidationOutcome> {
        let now = Utc::now();
        let mut identity = self.resolve_identity(context).await?;
        self.enforce_quarantine_gate(&mut identity).await?;

        let report = self.reports.get(report_id).await?;

        // Self-validation: same principal or same device as the
        // submitter.
        if !identity.principal.ephemeral
            && report.submitted_by.principal_id == identity.principal.id
        {
            return Err(CoreError::SelfValidation);
        }
        if let (Some(validator), Some(submitter)) =
            (&identity.device, &report.submitted_by.device_id)
        {
            if &validator.fingerprint_id == submitter {
                return Err(CoreError::SelfValidation);
            }
        }

        // Duplicate prevention needs a fingerprint; without one the
        // validation is accepted but cannot be deduplicated.
        if let Some(device) = &identity.device {
            if device.has_validated(report_id) {
                return Err(CoreError::DuplicateValidation);
            }
        } else {
            tracing::warn!(
                report_id = %report_id,
                "Validation without device fingerprint; duplicates not preventable"
            );
        }

        let report = self
            .update_report_with(report_id, move |report| {
                report.add_community_validation(is_positive);
                if let Some(outcome) = report.evaluate_community_outcome() {
                    report.apply_community_outcome(outcome);
                }
                Ok(())
            })
            .await?;

        // Record the act on the validator device.
        if let Some(device) = &identity.device {
            let fingerprint = device.fingerprint_id.clone();
            let result = self
                .update_device_with(&fingerprint, move |device| {
                    device.record_validation(report_id, is_positive, now);
                })
                .await;
            if let Err(error) = result {
                tracing::warn!(%fingerprint, error = %error, "Validator bookkeeping failed");
            }
        }

        // Automation events.
        match report.status {
            ReportStatus::Verified => {
                let event = DomainEvent::ReportVerified {
                    report_id,
                    community_trust: report.community.trust_score,
                    timestamp: now,
                };
                if let Err(error) = self.notifier.broadcast(&event).await {
                    tracing::warn!(error = %error, "report_verified notification failed");
                }
            }
            ReportStatus::UnderReview => {
                let event = DomainEvent::ReportFlaggedForReview {
                    report_id,
                    reason: "Negative community validation".to_string(),
                    timestamp: now,
                };
                if let Err(error) = self.notifier.notify_admins(&event).await {
                    tracing::warn!(error = %error, "report_flagged notification failed");
                }
            }
            _ => {}
        }

        self.cache.bump_version(NS_REPORTS).await;
        self.cache.bump_version(NS_ADMIN).await;

        Ok(ValidationOutcome {
            status: report.status,
            community_trust: report.community.trust_score,
            positive: report.community.positive,
            negative: report.community.negative,
        })
    }

    /// Drop every cache entry derived from a report.
    async fn invalidate_report_caches(&self, report_id: ReportId) {
        self.cache
            .delete(&cache_key("report", &["detail", &report_id.to_string()]))
            .await;
        self.cache.delete(ADMIN_DASHBOARD_KEY).await;
        self.cache.delete(ADMIN_SECURITY_ANALYTICS_KEY).await;
        self.cache.delete(FLAGGED_REPORTS_KEY).await;
        self.cache.bump_version(NS_ADMIN).await;
        self.cache.bump_version(NS_REPORTS).await;
    }

    async fn emit_moderation_event(&self, report: &Report, old_status: ReportStatus) {
        let now = Utc::now();
        let result = match report.status {
            ReportStatus::Approved => {
                let event = DomainEvent::ReportApproved {
                    report_id: report.id,
                    incident_type: report.incident_type.clone(),
                    severity: report.severity,
                    location: report.location.public_point,
                    timestamp: now,
                };
                self.notifier.broadcast(&event).await
            }
            ReportStatus::Flagged | ReportStatus::UnderReview => {
                let event = DomainEvent::ReportFlaggedForReview {
                    report_id: report.id,
                    reason: report
                        .moderation
                        .reason
                        .clone()
                        .unwrap_or_else(|| "Moderator review".to_string()),
                    timestamp: now,
                };
                self.notifier.notify_admins(&event).await
            }
            ReportStatus::Deleted => {
                let event = DomainEvent::ReportDeleted {
                    report_id: report.id,
                    timestamp: now,
                };
                self.notifier.broadcast(&event).await
            }
            _ => Ok(()),
        };
        if let Err(error) = result {
            tracing::warn!(
                report_id = %report.id,
                old_status = old_status.as_str(),
                error = %error,
                "Moderation notification failed"
            );
        }
    }

    /// Record an operator action with the audit collaborator; failures
    /// never roll back the action.
    pub(crate) async fn record_audit(
        &self,
        actor: &Principal,
        action_type: &str,
        target: AuditTarget,
        details: serde_json::Value,
        severity: EventSeverity,
    ) {
        let entry = AuditEntry {
            actor: actor.id.clone(),
            action_type: action_type.to_string(),
            target,
            details,
            outcome: AuditOutcome::Success,
            severity,
            timestamp: Utc::now(),
        };
        if let Err(error) = self.audit.record(&entry).await {
            tracing::warn!(action = %action_type, error = %error, "Audit record failed");
        }
    }
}
