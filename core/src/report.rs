//! Report aggregate: a geo-located incident moving through moderation.
//!
//! The moderation state machine is enforced here as pure functions the
//! persistence layer calls; invalid transitions fail loudly naming the
//! violated invariant. Public consumers only ever see the obfuscated
//! coordinates; the original point stays admin-visible.

use crate::error::{CoreError, Result};
use crate::geo::{self, GeoPoint};
use crate::principal::Role;
use crate::types::{FingerprintId, PrincipalId, ProcessingTier, ReportId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Incident types that engage the female-safety pipeline.
pub const FEMALE_SENSITIVE_TYPES: &[&str] = &[
    "harassment",
    "stalking",
    "eve_teasing",
    "inappropriate_behavior",
    "domestic_violence",
];

/// Minimum description length before the spam heuristic fires.
const MIN_DESCRIPTION_CHARS: usize = 10;

/// Identical-character run length that reads as keyboard mashing.
const SPAM_RUN_LEN: usize = 11;

// ═══════════════════════════════════════════════════════════════════════
// Status & State Machine
// ═══════════════════════════════════════════════════════════════════════

/// Moderation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Awaiting first moderation.
    #[default]
    Pending,
    /// Approved for the public feed.
    Approved,
    /// Rejected.
    Rejected,
    /// Flagged for special attention.
    Flagged,
    /// Pushed back for re-review.
    UnderReview,
    /// Community-verified.
    Verified,
    /// Archived out of the default feeds.
    Archived,
    /// Deleted; terminal.
    Deleted,
}

impl ReportStatus {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Flagged => "flagged",
            Self::UnderReview => "under_review",
            Self::Verified => "verified",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    /// Parse the wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for unknown statuses.
    pub fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "flagged" => Ok(Self::Flagged),
            "under_review" => Ok(Self::UnderReview),
            "verified" => Ok(Self::Verified),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(CoreError::InvalidValue {
                field: "status",
                reason: format!("unknown status: {other}"),
            }),
        }
    }

    /// Statuses visible to the public feed.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Approved | Self::Verified)
    }
}

/// Validate a moderator-driven status transition.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTransition`] naming the violated
/// invariant when the transition is not part of the state machine.
pub fn validate_moderator_transition(from: ReportStatus, to: ReportStatus) -> Result<()> {
    use ReportStatus as S;

    if from == S::Deleted {
        return Err(CoreError::InvalidTransition {
            invariant: "deleted is terminal: no resurrection".to_string(),
        });
    }
    // Deletion is always available to moderators.
    if to == S::Deleted {
        return Ok(());
    }

    let allowed = match from {
        S::Pending => matches!(to, S::Approved | S::Rejected | S::Flagged | S::UnderReview),
        S::Approved => matches!(to, S::Archived),
        S::UnderReview | S::Flagged => matches!(to, S::Approved | S::Rejected | S::Flagged)
            && to != from,
        S::Verified => matches!(to, S::Archived),
        S::Rejected | S::Archived | S::Deleted => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            invariant: format!(
                "moderator may not move a report from {} to {}",
                from.as_str(),
                to.as_str()
            ),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sub-documents
// ═══════════════════════════════════════════════════════════════════════

/// Incident location: obfuscated public point plus the admin-visible
/// original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    /// Obfuscated coordinates served to the public.
    pub public_point: GeoPoint,
    /// Original coordinates; admin-visible only.
    pub original_point: GeoPoint,
    /// Free-form address.
    pub address: Option<String>,
    /// Where the fix came from (`gps`, `manual`, `ip`).
    pub source: String,
    /// Inside the recognized service area.
    pub within_service_area: bool,
}

/// Submitter stamp applied by the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedBy {
    /// Submitting principal.
    pub principal_id: PrincipalId,
    /// Principal role at submission time.
    pub role: Role,
    /// Submitting device, when a fingerprint was presented.
    pub device_id: Option<FingerprintId>,
    /// SHA-256 of the source IP, truncated to 16 hex characters.
    pub ip_hash: Option<String>,
    /// Submitter requested anonymity.
    pub anonymous: bool,
}

/// Moderation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Moderation {
    /// Deciding moderator handle.
    pub moderated_by: Option<String>,
    /// Decision time.
    pub moderated_at: Option<DateTime<Utc>>,
    /// Decision reason.
    pub reason: Option<String>,
    /// Moderation queue priority (higher first).
    pub priority_level: u8,
    /// A female moderator must take this report.
    pub female_moderator_required: bool,
}

/// Community-validation counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommunityValidation {
    /// Positive validations.
    pub positive: u32,
    /// Negative validations.
    pub negative: u32,
    /// Community trust, 0–100, weighted by validator turnout.
    pub trust_score: f64,
    /// Validations received.
    pub validators_received: u32,
}

/// Validator requirements derived from severity and sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRequirements {
    /// Minimum validations before community rules engage.
    pub minimum_validations: u32,
    /// Female validators required.
    pub female_validators_required: bool,
}

/// Security flags stamped at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SecurityFlags {
    /// Spam heuristics fired.
    pub potential_spam: bool,
    /// Submitted from outside the service area.
    pub cross_border_report: bool,
    /// Coordinates fall outside the precomputed bounding boxes.
    pub suspicious_location: bool,
    /// Female-sensitive incident; validation restricted.
    pub requires_female_validation: bool,
    /// Composite security score, 0–100.
    pub security_score: f64,
}

/// Distributed-processing slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedProcessing {
    /// Assigned tier.
    pub tier: ProcessingTier,
    /// Queue priority (lower pops first).
    pub priority: u8,
    /// Job id once enqueued.
    pub job_id: Option<String>,
    /// Queue the job lives on.
    pub queue_name: String,
}

/// Processing status block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProcessing {
    /// Overall pipeline status label.
    pub overall_status: String,
    /// Processing mode label.
    pub mode: String,
    /// Distributed-processing slot.
    pub distributed: DistributedProcessing,
    /// All pipeline phases completed.
    pub all_phases_completed: bool,
}

/// Deduplication hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Deduplication {
    /// Content hash over type, description and rounded coordinates.
    pub content_hash: String,
    /// Content hash bucketed by submission hour.
    pub temporal_hash: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Report Aggregate
// ═══════════════════════════════════════════════════════════════════════

/// The report aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Server-assigned id.
    pub id: ReportId,
    /// Incident type label.
    pub incident_type: String,
    /// Free-text description.
    pub description: String,
    /// Severity 1–5.
    pub severity: Severity,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// Current moderation status.
    pub status: ReportStatus,
    /// Location block.
    pub location: ReportLocation,
    /// Submitter stamp.
    pub submitted_by: SubmittedBy,
    /// Moderation metadata.
    pub moderation: Moderation,
    /// Community-validation counters.
    pub community: CommunityValidation,
    /// Security flags.
    pub security_flags: SecurityFlags,
    /// Processing block.
    pub processing: ReportProcessing,
    /// Deduplication hashes.
    pub dedup: Deduplication,
    /// Opaque client behavior signature, kept for deep analysis.
    pub behavior_signature: Option<serde_json::Value>,
    /// Media attachment references.
    pub media: Vec<String>,
    /// Optimistic concurrency token; the store bumps it on every write.
    pub revision: u64,
}

impl Report {
    /// Create a pending report; the gate stamps `submitted_by` and calls
    /// [`Report::run_presave`] before the first store write.
    #[must_use]
    pub fn new(
        incident_type: impl Into<String>,
        description: impl Into<String>,
        original_point: GeoPoint,
        address: Option<String>,
        source: impl Into<String>,
        severity: Severity,
        submitted_by: SubmittedBy,
        now: DateTime<Utc>,
    ) -> Self {
        let id = ReportId::new();
        let within = geo::within_service_area(original_point);
        Self {
            id,
            incident_type: incident_type.into(),
            description: description.into(),
            severity,
            timestamp: now,
            status: ReportStatus::Pending,
            location: ReportLocation {
                // Placeholder until the pre-save hook obfuscates.
                public_point: original_point,
                original_point,
                address,
                source: source.into(),
                within_service_area: within,
            },
            submitted_by,
            moderation: Moderation::default(),
            community: CommunityValidation::default(),
            security_flags: SecurityFlags::default(),
            processing: ReportProcessing {
                overall_status: "received".to_string(),
                mode: "realtime".to_string(),
                distributed: DistributedProcessing {
                    tier: ProcessingTier::Standard,
                    priority: 0,
                    job_id: None,
                    queue_name: ProcessingTier::Standard.queue_name().to_string(),
                },
                all_phases_completed: false,
            },
            dedup: Deduplication::default(),
            behavior_signature: None,
            media: Vec::new(),
            revision: 0,
        }
    }

    /// Whether the incident type engages the female-safety pipeline.
    #[must_use]
    pub fn is_female_sensitive(&self) -> bool {
        FEMALE_SENSITIVE_TYPES.contains(&self.incident_type.as_str())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Processing Tier
    // ═══════════════════════════════════════════════════════════════════

    /// Assign the distributed-processing tier.
    ///
    /// Emergency for severity-5 and female-sensitive incidents, standard
    /// for 3–4, background for 1–2. Analytics is assigned externally for
    /// batch re-scoring.
    #[must_use]
    pub fn determine_processing_tier(&self) -> ProcessingTier {
        if self.severity.get() == 5 || self.is_female_sensitive() {
            ProcessingTier::Emergency
        } else if self.severity.get() >= 3 {
            ProcessingTier::Standard
        } else {
            ProcessingTier::Background
        }
    }

    /// Sorted-set score for the distributed queue: priority band first,
    /// then submission time.
    #[must_use]
    pub fn queue_score(&self) -> f64 {
        let band = match self.processing.distributed.tier {
            ProcessingTier::Emergency => 0.0,
            ProcessingTier::Standard => 1.0,
            ProcessingTier::Background => 2.0,
            ProcessingTier::Analytics => 3.0,
        };
        band * 1e13 + self.timestamp.timestamp_millis() as f64
    }

    // ═══════════════════════════════════════════════════════════════════
    // Community Validation
    // ═══════════════════════════════════════════════════════════════════

    /// Validator requirements: minimum scales with severity, plus one
    /// for female-sensitive incidents.
    #[must_use]
    pub fn get_validator_requirements(&self) -> ValidatorRequirements {
        let base = u32::from(self.severity.get()).max(2);
        let female = self.security_flags.requires_female_validation || self.is_female_sensitive();
        ValidatorRequirements {
            minimum_validations: base + u32::from(female),
            female_validators_required: female,
        }
    }

    /// Apply one community validation and recompute the weighted trust
    /// score.
    pub fn add_community_validation(&mut self, is_positive: bool) {
        if is_positive {
            self.community.positive += 1;
        } else {
            self.community.negative += 1;
        }
        self.community.validators_received += 1;

        let total = self.community.positive + self.community.negative;
        let ratio = if total == 0 {
            0.0
        } else {
            f64::from(self.community.positive) / f64::from(total)
        };
        let minimum = self.get_validator_requirements().minimum_validations.max(1);
        let turnout =
            (f64::from(self.community.validators_received) / f64::from(minimum)).min(1.0);
        self.community.trust_score = (ratio * 100.0 * turnout).clamp(0.0, 100.0);
    }

    /// Community-rule outcome for an approved report, if any.
    ///
    /// `verified` when positives reach the minimum with trust ≥ 80;
    /// `under_review` when negatives reach the minimum or trust < 20.
    #[must_use]
    pub fn evaluate_community_outcome(&self) -> Option<CommunityOutcome> {
        if self.status != ReportStatus::Approved {
            return None;
        }
        let requirements = self.get_validator_requirements();
        if self.community.positive >= requirements.minimum_validations
            && self.community.trust_score >= 80.0
        {
            Some(CommunityOutcome::Verified)
        } else if self.community.negative >= requirements.minimum_validations
            || self.community.trust_score < 20.0
        {
            Some(CommunityOutcome::UnderReview)
        } else {
            None
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Moderation
    // ═══════════════════════════════════════════════════════════════════

    /// Apply a moderator decision, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] naming the violated invariant.
    pub fn apply_moderator_status(
        &mut self,
        to: ReportStatus,
        moderator: impl Into<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_moderator_transition(self.status, to)?;
        self.status = to;
        self.moderation.moderated_by = Some(moderator.into());
        self.moderation.moderated_at = Some(now);
        self.moderation.reason = reason;
        Ok(())
    }

    /// Apply a community-rule outcome (no moderator involved).
    pub fn apply_community_outcome(&mut self, outcome: CommunityOutcome) {
        self.status = match outcome {
            CommunityOutcome::Verified => ReportStatus::Verified,
            CommunityOutcome::UnderReview => ReportStatus::UnderReview,
        };
    }

    // ═══════════════════════════════════════════════════════════════════
    // Pre-save
    // ═══════════════════════════════════════════════════════════════════

    /// Pre-save hook: obfuscate the public point, stamp security flags,
    /// compute the security score, assign the processing tier and the
    /// moderation priority, and fill the dedup hashes.
    ///
    /// `submitter_trust` is the submitting device's trust score when the
    /// gate has it loaded; absent for operator-submitted reports.
    pub fn run_presave(&mut self, submitter_trust: Option<f64>) {
        self.location.public_point =
            geo::obfuscate(self.location.original_point, &self.id.to_string());

        let female = self.is_female_sensitive();
        let flags = &mut self.security_flags;
        flags.potential_spam = is_spammy(&self.description);
        flags.cross_border_report = !self.location.within_service_area;
        flags.suspicious_location = !geo::within_service_area(self.location.original_point);
        flags.requires_female_validation = female;

        let mut score = submitter_trust.unwrap_or(50.0);
        if flags.potential_spam {
            score -= 30.0;
        }
        if flags.cross_border_report {
            score -= 15.0;
        }
        if flags.suspicious_location {
            score -= 15.0;
        }
        flags.security_score = score.clamp(0.0, 100.0);

        let tier = self.determine_processing_tier();
        self.processing.distributed.tier = tier;
        self.processing.distributed.queue_name = tier.queue_name().to_string();
        self.processing.distributed.priority = match tier {
            ProcessingTier::Emergency => 0,
            ProcessingTier::Standard => 1,
            ProcessingTier::Background => 2,
            ProcessingTier::Analytics => 3,
        };

        let mut priority = self.severity.get();
        if female {
            priority += 2;
        }
        if self.security_flags.suspicious_location {
            priority += 1;
        }
        self.moderation.priority_level = priority.min(10);
        self.moderation.female_moderator_required = female;

        self.fill_dedup_hashes();
    }

    fn fill_dedup_hashes(&mut self) {
        // Round to ~100 m so nearby duplicates hash together.
        let lng = (self.location.original_point.lng * 1000.0).round() / 1000.0;
        let lat = (self.location.original_point.lat * 1000.0).round() / 1000.0;
        let content = format!("{}|{}|{lng}|{lat}", self.incident_type, self.description);
        let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));

        let hour_bucket = self.timestamp.format("%Y%m%d%H");
        let temporal = format!("{content_hash}|{hour_bucket}");
        self.dedup.content_hash = content_hash;
        self.dedup.temporal_hash = format!("{:x}", Sha256::digest(temporal.as_bytes()));
    }
}

/// Outcome of the community-validation rules on an approved report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityOutcome {
    /// Promote to verified.
    Verified,
    /// Push back for re-review.
    UnderReview,
}

/// Spam heuristics: too short, a long identical-character run, or no
/// letters at all.
#[must_use]
pub fn is_spammy(description: &str) -> bool {
    let chars: Vec<char> = description.chars().collect();
    if chars.len() < MIN_DESCRIPTION_CHARS {
        return true;
    }
    if !chars.iter().any(|c| c.is_alphabetic()) {
        return true;
    }

    let mut run = 1_usize;
    for window in chars.windows(2) {
        if window[0] == window[1] {
            run += 1;
            if run >= SPAM_RUN_LEN {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn submitted_by() -> SubmittedBy {
        SubmittedBy {
            principal_id: PrincipalId::new(),
            role: Role::Anonymous,
            device_id: Some(FingerprintId::new("fp-A").unwrap()),
            ip_hash: Some("a".repeat(16)),
            anonymous: true,
        }
    }

    fn report(incident_type: &str, description: &str, severity: u8) -> Report {
        Report::new(
            incident_type,
            description,
            GeoPoint::new(90.41, 23.81),
            None,
            "manual",
            Severity::new(severity).unwrap(),
            submitted_by(),
            Utc::now(),
        )
    }

    #[test]
    fn spam_heuristics() {
        assert!(is_spammy("short"));
        assert!(is_spammy("aaaaaaaaaaa")); // 11-run
        assert!(is_spammy("1234567890 5551234"));
        assert!(!is_spammy("Someone was followed near the market."));
        // A 10-run inside a long description is fine.
        assert!(!is_spammy("loud noise aaaaaaaaaa heard here"));
    }

    #[test]
    fn presave_obfuscates_and_flags() {
        let mut r = report("theft", "aaaaaaaaaaa", 3);
        r.run_presave(Some(50.0));
        assert!(r.security_flags.potential_spam);
        assert!(!r.security_flags.cross_border_report);
        assert_ne!(r.location.public_point, r.location.original_point);
        assert_eq!(r.security_flags.security_score, 20.0);
        assert!(!r.dedup.content_hash.is_empty());
    }

    #[test]
    fn cross_border_report_is_flagged() {
        let mut r = Report::new(
            "theft",
            "A believable description here.",
            GeoPoint::new(77.2, 28.6), // Delhi
            None,
            "manual",
            Severity::new(3).unwrap(),
            submitted_by(),
            Utc::now(),
        );
        r.run_presave(Some(50.0));
        assert!(r.security_flags.cross_border_report);
        assert!(r.security_flags.suspicious_location);
        assert_eq!(r.security_flags.security_score, 20.0);
    }

    #[test]
    fn processing_tiers() {
        assert_eq!(
            report("theft", "desc desc desc", 5).determine_processing_tier(),
            ProcessingTier::Emergency
        );
        assert_eq!(
            report("harassment", "desc desc desc", 2).determine_processing_tier(),
            ProcessingTier::Emergency
        );
        assert_eq!(
            report("theft", "desc desc desc", 3).determine_processing_tier(),
            ProcessingTier::Standard
        );
        assert_eq!(
            report("theft", "desc desc desc", 1).determine_processing_tier(),
            ProcessingTier::Background
        );
    }

    #[test]
    fn queue_score_orders_by_tier_then_time() {
        let mut emergency = report("theft", "desc desc desc", 5);
        emergency.run_presave(None);
        let mut background = report("theft", "desc desc desc", 1);
        background.run_presave(None);
        assert!(emergency.queue_score() < background.queue_score());
    }

    #[test]
    fn validator_requirements_scale_with_severity() {
        assert_eq!(
            report("theft", "d", 1).get_validator_requirements().minimum_validations,
            2
        );
        assert_eq!(
            report("theft", "d", 4).get_validator_requirements().minimum_validations,
            4
        );
        let female = report("harassment", "d", 3).get_validator_requirements();
        assert_eq!(female.minimum_validations, 4);
        assert!(female.female_validators_required);
    }

    #[test]
    fn community_trust_is_turnout_weighted() {
        let mut r = report("theft", "a believable description", 3);
        r.status = ReportStatus::Approved;
        r.add_community_validation(true);
        // 1 of 3 minimum validators: 100 × 1/3.
        assert!((r.community.trust_score - 100.0 / 3.0).abs() < 1e-9);
        r.add_community_validation(true);
        r.add_community_validation(true);
        assert_eq!(r.community.trust_score, 100.0);
    }

    #[test]
    fn community_rules_promote_and_demote() {
        let mut r = report("theft", "a believable description", 3);
        r.status = ReportStatus::Approved;
        for _ in 0..3 {
            r.add_community_validation(true);
        }
        assert_eq!(r.evaluate_community_outcome(), Some(CommunityOutcome::Verified));

        let mut r = report("theft", "a believable description", 3);
        r.status = ReportStatus::Approved;
        for _ in 0..3 {
            r.add_community_validation(false);
        }
        assert_eq!(
            r.evaluate_community_outcome(),
            Some(CommunityOutcome::UnderReview)
        );

        // Pending reports never auto-transition.
        let mut r = report("theft", "a believable description", 3);
        for _ in 0..3 {
            r.add_community_validation(true);
        }
        assert_eq!(r.evaluate_community_outcome(), None);
    }

    #[test]
    fn moderator_state_machine() {
        let now = Utc::now();
        let mut r = report("theft", "a believable description", 3);
        r.apply_moderator_status(ReportStatus::Approved, "alice", None, now)
            .unwrap();
        assert_eq!(r.status, ReportStatus::Approved);
        assert_eq!(r.moderation.moderated_by.as_deref(), Some("alice"));

        // approved → pending is not a thing.
        assert!(r
            .apply_moderator_status(ReportStatus::Pending, "alice", None, now)
            .is_err());

        // approved → archived is.
        r.apply_moderator_status(ReportStatus::Archived, "alice", None, now)
            .unwrap();
    }

    #[test]
    fn deletion_is_terminal() {
        let now = Utc::now();
        let mut r = report("theft", "a believable description", 3);
        r.apply_moderator_status(ReportStatus::Deleted, "alice", None, now)
            .unwrap();
        let err = r
            .apply_moderator_status(ReportStatus::Pending, "alice", None, now)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(err.kind(), "invalid_value");
    }

    #[test]
    fn under_review_can_be_re_moderated() {
        let now = Utc::now();
        let mut r = report("theft", "a believable description", 3);
        r.status = ReportStatus::UnderReview;
        r.apply_moderator_status(ReportStatus::Rejected, "alice", None, now)
            .unwrap();
    }

    #[test]
    fn female_sensitive_priority_bump() {
        let mut r = report("harassment", "a believable description", 3);
        r.run_presave(None);
        assert_eq!(r.moderation.priority_level, 5);
        assert!(r.moderation.female_moderator_required);
    }
}
