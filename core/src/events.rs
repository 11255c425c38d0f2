//! Logical events emitted by the trust core.
//!
//! The core does not own a transport; it hands these events to an
//! injected notifier (WebSocket fan-out, message bus, test recorder).
//! Payloads carry obfuscated coordinates only; original coordinates
//! never leave the document store through this surface.

use crate::geo::GeoPoint;
use crate::types::{EventSeverity, FingerprintId, PrincipalId, ReportId, RiskTier, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical event surface for the notifier collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    // ═══════════════════════════════════════════════════════════════════
    // Report Events
    // ═══════════════════════════════════════════════════════════════════
    /// A report entered the moderation queue.
    NewPendingReport {
        /// Report identifier.
        report_id: ReportId,
        /// Incident type.
        incident_type: String,
        /// Severity 1–5.
        severity: Severity,
        /// Obfuscated public coordinates.
        location: GeoPoint,
        /// Moderation priority.
        priority: u8,
        /// Security score stamped at ingest.
        security_score: f64,
        /// When the report was accepted.
        timestamp: DateTime<Utc>,
    },

    /// A moderator approved a report for the public feed.
    ReportApproved {
        /// Report identifier.
        report_id: ReportId,
        /// Incident type.
        incident_type: String,
        /// Severity 1–5.
        severity: Severity,
        /// Obfuscated public coordinates.
        location: GeoPoint,
        /// When the decision was made.
        timestamp: DateTime<Utc>,
    },

    /// Community validation promoted an approved report to verified.
    ReportVerified {
        /// Report identifier.
        report_id: ReportId,
        /// Community trust score at promotion.
        community_trust: f64,
        /// When the promotion happened.
        timestamp: DateTime<Utc>,
    },

    /// Negative community validation pushed a report back to review.
    ReportFlaggedForReview {
        /// Report identifier.
        report_id: ReportId,
        /// Why the report was flagged.
        reason: String,
        /// When the flagging happened.
        timestamp: DateTime<Utc>,
    },

    /// A moderator deleted a report (terminal).
    ReportDeleted {
        /// Report identifier.
        report_id: ReportId,
        /// When the deletion happened.
        timestamp: DateTime<Utc>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Security Events
    // ═══════════════════════════════════════════════════════════════════
    /// A device crossed into the high or critical risk tier.
    HighRiskDevice {
        /// Device fingerprint.
        fingerprint_id: FingerprintId,
        /// Linked principal, when one exists.
        principal_id: Option<PrincipalId>,
        /// Risk tier after assessment.
        risk_tier: RiskTier,
        /// Trust score after assessment.
        trust_score: f64,
        /// When the assessment ran.
        timestamp: DateTime<Utc>,
    },

    /// The sweep surfaced a likely coordinated campaign.
    CoordinatedAttackDetected {
        /// Composite pattern key of the flagged group.
        pattern: String,
        /// Total grouped submissions.
        device_count: usize,
        /// Unique devices in the group.
        unique_devices: usize,
        /// Group mean trust.
        mean_trust: f64,
        /// Group mean anomaly.
        mean_anomaly: f64,
        /// Suspicion tier (`high` or `critical`).
        suspicion: EventSeverity,
        /// When the sweep ran.
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewPendingReport { .. } => "new_pending_report",
            Self::ReportApproved { .. } => "report_approved",
            Self::ReportVerified { .. } => "report_verified",
            Self::ReportFlaggedForReview { .. } => "report_flagged_for_review",
            Self::ReportDeleted { .. } => "report_deleted",
            Self::HighRiskDevice { .. } => "high_risk_device",
            Self::CoordinatedAttackDetected { .. } => "coordinated_attack_detected",
        }
    }
}

/// Entry handed to the external audit collaborator for every mutating
/// operator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Acting principal.
    pub actor: PrincipalId,
    /// Machine-readable action type, e.g. `report_status_change`.
    pub action_type: String,
    /// What the action touched.
    pub target: AuditTarget,
    /// Free-form action detail.
    pub details: serde_json::Value,
    /// Whether the action succeeded.
    pub outcome: AuditOutcome,
    /// Severity for audit triage.
    pub severity: EventSeverity,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

/// Target of an audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditTarget {
    /// A principal document.
    Principal(PrincipalId),
    /// A device document.
    Device(FingerprintId),
    /// A report document.
    Report(ReportId),
    /// A system-wide action with no single target.
    System,
}

/// Result of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The action completed.
    Success,
    /// The action was rejected or failed.
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_surface() {
        let event = DomainEvent::ReportDeleted {
            report_id: ReportId::new(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.name(), "report_deleted");

        let json = serde_json::to_value(&event).ok();
        let tag = json
            .as_ref()
            .and_then(|v| v.get("event"))
            .and_then(|v| v.as_str());
        assert_eq!(tag, Some("report_deleted"));
    }
}
