//! Device aggregate: anonymous-but-trackable per-install identity.
//!
//! A device document is created lazily on the first request carrying a
//! fingerprint id (or at ephemeral-promotion time) and is never deleted.
//! Every save runs the synchronous fast path in a fixed order: trust →
//! risk tier → anomaly smoothing → alert rebuild → quarantine predicate.
//! All of it is pure; the persistence layer calls [`Device::run_presave`]
//! before writing so the invariants are unit-testable without a store.

use crate::geo::GeoPoint;
use crate::types::{AnalysisPriority, FingerprintId, PrincipalId, ReportId, RiskTier};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Validation-log entries kept per device, newest first.
pub const VALIDATION_LOG_CAP: usize = 100;

/// Quarantine-history entries kept per device, newest first.
pub const QUARANTINE_HISTORY_CAP: usize = 50;

/// Location-history fixes kept per device, newest first.
pub const LOCATION_HISTORY_CAP: usize = 50;

// ═══════════════════════════════════════════════════════════════════════
// Profiles
// ═══════════════════════════════════════════════════════════════════════

/// Browser/app signature features collected client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceSignature {
    /// Canvas rendering signature.
    pub canvas_fingerprint: Option<String>,
    /// WebGL rendering signature.
    pub webgl_fingerprint: Option<String>,
    /// Audio context signature.
    pub audio_fingerprint: Option<String>,
    /// Screen dimensions, e.g. `1920x1080`.
    pub screen_resolution: Option<String>,
    /// IANA timezone, e.g. `Asia/Dhaka`.
    pub timezone: Option<String>,
    /// Primary browser language.
    pub language: Option<String>,
    /// All advertised languages.
    pub languages: Vec<String>,
    /// Operating system / platform string.
    pub platform: Option<String>,
    /// Raw user agent, kept for consistency checking.
    pub user_agent: Option<String>,
    /// SHA-256 of the user agent.
    pub user_agent_hash: Option<String>,
    /// Available system fonts.
    pub fonts_available: Vec<String>,
    /// Installed browser plugins.
    pub plugins_installed: Vec<String>,
    /// Logical processor count.
    pub hardware_concurrency: Option<u32>,
    /// Device memory, GB.
    pub device_memory_gb: Option<u32>,
    /// Screen color depth, bits.
    pub color_depth: Option<u32>,
    /// Device pixel ratio.
    pub pixel_ratio: Option<f64>,
}

impl DeviceSignature {
    /// Refresh the stored user-agent hash from the raw user agent.
    pub fn rehash_user_agent(&mut self) {
        self.user_agent_hash = self
            .user_agent
            .as_ref()
            .map(|ua| format!("{:x}", Sha256::digest(ua.as_bytes())));
    }
}

/// Snapshot of the drift-sensitive signature fields, captured at the last
/// significant change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSnapshot {
    /// User agent at snapshot time.
    pub user_agent: Option<String>,
    /// Screen resolution at snapshot time.
    pub screen_resolution: Option<String>,
    /// Timezone at snapshot time.
    pub timezone: Option<String>,
    /// Platform at snapshot time.
    pub platform: Option<String>,
    /// When the snapshot was captured.
    pub timestamp: DateTime<Utc>,
}

/// Human-vs-bot behavioral signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    /// Average typing speed, words per minute.
    pub average_typing_speed: f64,
    /// Mouse movement signature hash.
    pub mouse_movement_pattern: Option<String>,
    /// Typing rhythm signature hash.
    pub keyboard_interaction_pattern: Option<String>,
    /// Seconds to complete the submission form.
    pub form_completion_time: f64,
    /// Scroll pattern label.
    pub scroll_behavior: Option<String>,
    /// Touch interaction label (mobile).
    pub touch_pattern: Option<String>,
    /// Page navigation label.
    pub navigation_pattern: Option<String>,
    /// Exponential moving average of session length, minutes.
    pub session_length: f64,
    /// Reports per hour.
    pub reporting_frequency: f64,
    /// Confidence the operator is human, 0–100.
    pub human_behavior_score: f64,
    /// Detected anomalous behaviors.
    pub anomalous_patterns: Vec<String>,
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self {
            average_typing_speed: 0.0,
            mouse_movement_pattern: None,
            keyboard_interaction_pattern: None,
            form_completion_time: 0.0,
            scroll_behavior: None,
            touch_pattern: None,
            navigation_pattern: None,
            session_length: 0.0,
            reporting_frequency: 0.0,
            human_behavior_score: 50.0,
            anomalous_patterns: Vec::new(),
        }
    }
}

/// Hardware form factor inferred from the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone.
    Mobile,
    /// Desktop computer.
    Desktop,
    /// Tablet.
    Tablet,
    /// Could not be inferred.
    #[default]
    Unknown,
}

/// Network-derived signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Estimated country code.
    pub estimated_country: String,
    /// ISP or network provider.
    pub network_provider: Option<String>,
    /// Connection type (wifi, mobile, …).
    pub connection_type: Option<String>,
    /// Inferred form factor.
    pub device_type: DeviceType,
    /// VPN exit suspected.
    pub vpn_suspected: bool,
    /// Proxy detected.
    pub proxy_detected: bool,
    /// Tor exit detected.
    pub tor_detected: bool,
    /// SHA-256 of the source IP, truncated to 16 hex characters.
    pub ip_hash: Option<String>,
    /// Suspicious HTTP headers seen on requests from this device.
    pub suspicious_headers: Vec<String>,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            estimated_country: "BD".to_string(),
            network_provider: None,
            connection_type: None,
            device_type: DeviceType::Unknown,
            vpn_suspected: false,
            proxy_detected: false,
            tor_detected: false,
            ip_hash: None,
            suspicious_headers: Vec::new(),
        }
    }
}

/// One community-validation act recorded against this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Validated report.
    pub report_id: ReportId,
    /// When the validation happened.
    pub timestamp: DateTime<Utc>,
    /// Positive or negative vote.
    pub is_positive: bool,
}

/// Quarantine state with deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuarantineState {
    /// Currently quarantined.
    pub active: bool,
    /// Deadline after which the quarantine auto-lifts.
    pub until: Option<DateTime<Utc>>,
    /// Why the quarantine was imposed.
    pub reason: Option<String>,
}

/// What imposed or lifted a quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineTrigger {
    /// The pre-save predicate.
    #[default]
    Auto,
    /// An operator decision.
    Moderator,
    /// A counter crossing its threshold.
    ThresholdViolation,
    /// Another subsystem (e.g. principal critical event).
    System,
}

/// One quarantine lifecycle entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEvent {
    /// Why it happened.
    pub reason: String,
    /// What triggered it.
    pub triggered_by: QuarantineTrigger,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Reviewing moderator, when one was involved.
    pub reviewed_by: Option<String>,
    /// When the review happened.
    pub review_timestamp: Option<DateTime<Utc>>,
    /// Whether an automatic release is scheduled.
    pub auto_release_scheduled: bool,
}

/// Security reputation: trust, abuse history, validation history,
/// quarantine state and the derived suspicion flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSecurityProfile {
    /// Overall trust, 0–100.
    pub trust_score: f64,
    /// Coarse risk classification.
    pub risk_tier: RiskTier,

    /// Reports submitted, lifetime.
    pub total_reports_submitted: u32,
    /// Reports approved by moderation.
    pub approved_reports: u32,
    /// Reports rejected by moderation.
    pub rejected_reports: u32,
    /// Reports classified as spam.
    pub spam_reports: u32,
    /// Reports flagged by moderators.
    pub flagged_reports: u32,

    /// Validations given, lifetime.
    pub total_validations_given: u32,
    /// Validations that matched the eventual moderation outcome.
    pub accurate_validations: u32,
    /// Validations that contradicted the eventual outcome.
    pub inaccurate_validations: u32,
    /// Accuracy rate, 0–100.
    pub validation_accuracy_rate: f64,
    /// Recent validations, newest first, capped at
    /// [`VALIDATION_LOG_CAP`].
    pub validation_history: Vec<ValidationRecord>,

    /// Violation labels accumulated over the device's lifetime.
    pub security_violations: Vec<String>,
    /// When the last security incident happened.
    pub last_security_event: Option<DateTime<Utc>>,

    /// Quarantine state.
    pub quarantine: QuarantineState,
    /// Permanent ban; quarantine never lifts while set.
    pub permanently_banned: bool,
    /// Silent suppression: submissions accepted but demoted.
    pub shadow_banned: bool,

    /// Derived suspicion flags.
    pub spam_suspected: bool,
    /// Signature or GPS spoofing suspected.
    pub spoofing_suspected: bool,
    /// Participation in a detected coordinated campaign.
    pub coordinated_attack_suspected: bool,
}

impl Default for DeviceSecurityProfile {
    fn default() -> Self {
        Self {
            trust_score: 50.0,
            risk_tier: RiskTier::Medium,
            total_reports_submitted: 0,
            approved_reports: 0,
            rejected_reports: 0,
            spam_reports: 0,
            flagged_reports: 0,
            total_validations_given: 0,
            accurate_validations: 0,
            inaccurate_validations: 0,
            validation_accuracy_rate: 0.0,
            validation_history: Vec::new(),
            security_violations: Vec::new(),
            last_security_event: None,
            quarantine: QuarantineState::default(),
            permanently_banned: false,
            shadow_banned: false,
            spam_suspected: false,
            spoofing_suspected: false,
            coordinated_attack_suspected: false,
        }
    }
}

/// Anomaly scoring state. The score moves at most
/// `anomaly_smoothing_delta` per save; the previous score is the
/// smoothing anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnomalyProfile {
    /// Current anomaly score, 0–100.
    pub score: f64,
    /// Score after the previous save (smoothing anchor).
    pub previous_score: f64,
    /// One-shot penalty accrued by signature drift, consumed by the next
    /// fast-path evaluation.
    pub signature_drift_penalty: f64,
    /// Deep analysis requested.
    pub needs_detailed_analysis: bool,
    /// Queue priority for the pending analysis.
    pub analysis_priority: AnalysisPriority,
    /// Queue position, when known.
    pub queue_position: Option<u64>,
}

/// Time-of-day and day-of-week submission histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPattern {
    /// Submissions per hour of day.
    pub hourly_distribution: [u32; 24],
    /// Submissions per weekday (Monday = 0).
    pub daily_distribution: [u32; 7],
    /// Hours holding the current maximum.
    pub peak_hours: Vec<u8>,
    /// Concentrated submission clusters detected.
    pub suspicious_time_patterns: bool,
}

impl Default for SubmissionPattern {
    fn default() -> Self {
        Self {
            hourly_distribution: [0; 24],
            daily_distribution: [0; 7],
            peak_hours: Vec::new(),
            suspicious_time_patterns: false,
        }
    }
}

impl SubmissionPattern {
    /// Total recorded submissions.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.hourly_distribution.iter().sum()
    }
}

/// One geographic fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Coordinates.
    pub point: GeoPoint,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
    /// Reported accuracy radius, meters.
    pub accuracy_m: f64,
}

/// Geographic consistency signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    /// Most recent fix.
    pub last_known: Option<LocationFix>,
    /// Recent fixes, newest first, capped at [`LOCATION_HISTORY_CAP`].
    pub history: Vec<LocationFix>,
    /// Activity observed outside the service area.
    pub cross_border_activity: bool,
    /// Count of implausible jumps between consecutive fixes.
    pub location_jumps: u32,
    /// Latest reported GPS accuracy, meters.
    pub gps_accuracy_m: f64,
    /// Suspicious movement pattern detected.
    pub suspicious_patterns: bool,
    /// Regular GPS spoofing suspected.
    pub gps_spoofing_suspected: bool,
    /// Location drift score, 0–100.
    pub location_drift_score: f64,
}

impl Default for LocationProfile {
    fn default() -> Self {
        Self {
            last_known: None,
            history: Vec::new(),
            cross_border_activity: false,
            location_jumps: 0,
            gps_accuracy_m: 100.0,
            suspicious_patterns: false,
            gps_spoofing_suspected: false,
            location_drift_score: 0.0,
        }
    }
}

/// A threat-intelligence feed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatMatch {
    /// Feed the match came from.
    pub source: String,
    /// Match confidence, 0–100.
    pub confidence: f64,
    /// Match type label.
    pub kind: String,
    /// When the match was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Threat-intelligence assessment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIntelligence {
    /// Detected threat pattern labels.
    pub suspicious_patterns: Vec<String>,
    /// Confirmed coordinated-campaign participant.
    pub coordinated_attack_participant: bool,
    /// Mass-reporting campaign membership.
    pub mass_reporting_campaign: bool,
    /// Cross-border threat flag.
    pub cross_border_threat: bool,
    /// Political-manipulation flag.
    pub political_manipulation: bool,
    /// Botnet membership.
    pub botnet_member: bool,
    /// Reporting-frequency label from pattern analysis.
    pub reporting_frequency: Option<String>,
    /// Content repetition score, 0–100.
    pub content_similarity: f64,
    /// Time-based correlation score, 0–100.
    pub temporal_correlation: f64,
    /// Feed matches.
    pub matches: Vec<ThreatMatch>,
    /// Overall threat confidence, 0–100.
    pub threat_confidence: f64,
    /// Last assessment time.
    pub last_threat_assessment: DateTime<Utc>,
    /// Sources that contributed.
    pub threat_sources: Vec<String>,
    /// Applied countermeasures.
    pub mitigation_actions: Vec<String>,
}

impl ThreatIntelligence {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            suspicious_patterns: Vec::new(),
            coordinated_attack_participant: false,
            mass_reporting_campaign: false,
            cross_border_threat: false,
            political_manipulation: false,
            botnet_member: false,
            reporting_frequency: None,
            content_similarity: 0.0,
            temporal_correlation: 0.0,
            matches: Vec::new(),
            threat_confidence: 0.0,
            last_threat_assessment: now,
            threat_sources: Vec::new(),
            mitigation_actions: Vec::new(),
        }
    }
}

/// Cross-device correlation state, maintained by deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDeviceCorrelation {
    /// Fingerprints believed to belong to the same operator.
    pub related_devices: Vec<FingerprintId>,
    /// Characteristics shared with the related devices.
    pub shared_characteristics: Vec<String>,
    /// Correlation confidence, 0–100.
    pub confidence: f64,
    /// Mean trust of the related devices at the last correlation run;
    /// the trust formula blends against this when confidence is high.
    pub related_trust_avg: Option<f64>,
    /// Last correlation update.
    pub last_update: DateTime<Utc>,
}

impl CrossDeviceCorrelation {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            related_devices: Vec::new(),
            shared_characteristics: Vec::new(),
            confidence: 0.0,
            related_trust_avg: None,
            last_update: now,
        }
    }
}

/// Regional plausibility signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionProfile {
    /// Source appears to operate inside the service area.
    pub likely_from_bd: bool,
    /// Estimated administrative division.
    pub estimated_division: Option<String>,
    /// Estimated district.
    pub estimated_district: Option<String>,
    /// Local-language usage observed.
    pub local_language_usage: bool,
    /// Cultural context match, 0–100.
    pub cultural_context_match: f64,
    /// Cross-border suspicion, 0–100.
    pub cross_border_suspicion: f64,
}

impl Default for RegionProfile {
    fn default() -> Self {
        Self {
            // Earned by evidence (timezone, language, consistent local
            // fixes) during deep analysis, not assumed.
            likely_from_bd: false,
            estimated_division: None,
            estimated_district: None,
            local_language_usage: false,
            cultural_context_match: 50.0,
            cross_border_suspicion: 0.0,
        }
    }
}

/// Session and engagement tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceActivity {
    /// First request from this device.
    pub first_seen: DateTime<Utc>,
    /// Most recent request.
    pub last_seen: DateTime<Utc>,
    /// Sessions observed.
    pub total_sessions: u64,
    /// Page views observed.
    pub total_page_views: u64,
    /// Average session duration, minutes.
    pub average_session_duration: f64,
    /// Map feature interactions.
    pub map_usage: u64,
    /// Report submissions.
    pub reporting_usage: u64,
    /// Validation participations.
    pub validation_usage: u64,
    /// Single-page visit rate.
    pub bounce_rate: f64,
    /// Engagement quality, 0–100.
    pub engagement_score: f64,
    /// Community engagement level.
    pub community_participation: f64,
}

impl DeviceActivity {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            total_sessions: 1,
            total_page_views: 0,
            average_session_duration: 0.0,
            map_usage: 0,
            reporting_usage: 0,
            validation_usage: 0,
            bounce_rate: 0.0,
            engagement_score: 0.0,
            community_participation: 0.0,
        }
    }
}

/// Background-processing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessingStatus {
    /// When detailed analysis last completed.
    pub last_detailed_analysis: Option<DateTime<Utc>>,
    /// Next scheduled background analysis.
    pub next_scheduled_analysis: Option<DateTime<Utc>>,
    /// A worker currently holds this device.
    pub analysis_in_progress: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Device Aggregate
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of the synchronous pre-save fast path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresaveOutcome {
    /// Risk landed at high or critical; observability should be told.
    pub high_risk: bool,
    /// The quarantine predicate fired during this save.
    pub newly_quarantined: bool,
    /// Deep analysis was requested, with this priority.
    pub analysis_requested: Option<AnalysisPriority>,
}

/// The device aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique fingerprint id.
    pub fingerprint_id: FingerprintId,
    /// Linked principal, healed on access when missing.
    pub principal_id: Option<PrincipalId>,
    /// Current signature.
    pub signature: DeviceSignature,
    /// Snapshot at the last significant signature change.
    pub previous_signature: Option<SignatureSnapshot>,
    /// Behavioral signals.
    pub behavior: BehaviorProfile,
    /// Network signals.
    pub network: NetworkProfile,
    /// Security reputation.
    pub security: DeviceSecurityProfile,
    /// Quarantine lifecycle log, newest first.
    pub quarantine_history: Vec<QuarantineEvent>,
    /// Anomaly scoring state.
    pub anomaly: AnomalyProfile,
    /// Submission histograms.
    pub submission_pattern: SubmissionPattern,
    /// Geographic signals.
    pub location: LocationProfile,
    /// Threat-intelligence state.
    pub threat: ThreatIntelligence,
    /// Cross-device correlation state.
    pub correlation: CrossDeviceCorrelation,
    /// Regional plausibility signals.
    pub region: RegionProfile,
    /// Dashboard-facing alert strings, rebuilt on each assessment.
    pub moderator_alerts: Vec<String>,
    /// Session/engagement tracking.
    pub activity: DeviceActivity,
    /// Background-processing bookkeeping.
    pub processing: ProcessingStatus,
    /// Optimistic concurrency token; the store bumps it on every write.
    pub revision: u64,
}

impl Device {
    /// Create a fresh device for a first-seen fingerprint.
    #[must_use]
    pub fn new(fingerprint_id: FingerprintId, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint_id,
            principal_id: None,
            signature: DeviceSignature::default(),
            previous_signature: None,
            behavior: BehaviorProfile::default(),
            network: NetworkProfile::default(),
            security: DeviceSecurityProfile::default(),
            quarantine_history: Vec::new(),
            anomaly: AnomalyProfile::default(),
            submission_pattern: SubmissionPattern::default(),
            location: LocationProfile::default(),
            threat: ThreatIntelligence::new(now),
            correlation: CrossDeviceCorrelation::new(now),
            region: RegionProfile::default(),
            moderator_alerts: Vec::new(),
            activity: DeviceActivity::new(now),
            processing: ProcessingStatus::default(),
            revision: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Trust & Risk
    // ═══════════════════════════════════════════════════════════════════

    /// Approval rate over submitted reports, 0–1.
    #[must_use]
    pub fn approval_rate(&self) -> f64 {
        if self.security.total_reports_submitted == 0 {
            return 0.0;
        }
        f64::from(self.security.approved_reports) / f64::from(self.security.total_reports_submitted)
    }

    /// Long-term reliability, 0–1: approval rate damped by volume so a
    /// handful of lucky approvals does not read as a track record.
    #[must_use]
    pub fn long_term_reliability(&self) -> f64 {
        let volume = f64::from(self.security.total_reports_submitted.min(50)) / 50.0;
        self.approval_rate() * volume
    }

    /// Evaluate the trust-score formula. Pure; does not mutate.
    #[must_use]
    pub fn calculate_trust_score(&self, now: DateTime<Utc>) -> f64 {
        let mut score = 50.0;

        if self.security.total_reports_submitted > 0 {
            score += self.approval_rate() * 30.0;
        }
        if self.security.validation_accuracy_rate > 80.0 {
            score += 20.0;
        }
        if self.behavior.human_behavior_score > 70.0 {
            score += 15.0;
        }
        if self.region.likely_from_bd && !self.network.vpn_suspected {
            score += 10.0;
        }

        let account_age_days = (now - self.activity.first_seen).num_days();
        if account_age_days >= 30 && self.security.total_reports_submitted >= 10 {
            score += self.long_term_reliability() * 15.0;
        }

        if self.security.spam_reports > 2 {
            score -= 30.0;
        }
        if self.threat.coordinated_attack_participant {
            score -= 40.0;
        }
        if self.region.cross_border_suspicion > 70.0 {
            score -= 25.0;
        }
        if self.threat.botnet_member {
            score -= 50.0;
        }
        score -= self.anomaly.score * 0.5;
        if self.security.shadow_banned {
            score -= 10.0;
        }

        // High-confidence correlation pulls trust toward the cluster.
        if self.correlation.confidence > 70.0 && !self.correlation.related_devices.is_empty() {
            if let Some(related_avg) = self.correlation.related_trust_avg {
                score = (score + related_avg) / 2.0;
            }
        }

        score.clamp(0.0, 100.0)
    }

    /// Classify the current trust/threat/anomaly space into a risk tier.
    #[must_use]
    pub fn assess_risk_tier(&self) -> RiskTier {
        let threat = self.threat.threat_confidence;
        let trust = self.security.trust_score;
        let cross_border = self.region.cross_border_suspicion;
        let anomaly = self.anomaly.score;

        if threat > 80.0 || trust < 20.0 || self.threat.botnet_member || anomaly > 80.0 {
            RiskTier::Critical
        } else if threat > 60.0 || trust < 40.0 || cross_border > 70.0 || anomaly > 60.0 {
            RiskTier::High
        } else if threat > 40.0 || trust < 60.0 || cross_border > 40.0 || anomaly > 40.0 {
            RiskTier::Medium
        } else if trust > 80.0 && threat < 20.0 && anomaly < 20.0 {
            RiskTier::VeryLow
        } else {
            RiskTier::Low
        }
    }

    /// Rebuild the dashboard alert strings from current flags.
    pub fn rebuild_moderator_alerts(&mut self) {
        let mut alerts = Vec::new();
        match self.security.risk_tier {
            RiskTier::Critical => alerts.push("Critical Risk Device".to_string()),
            RiskTier::High => alerts.push("High Risk Device".to_string()),
            _ => {}
        }
        if self.network.vpn_suspected {
            alerts.push("VPN Detected".to_string());
        }
        if self.network.tor_detected {
            alerts.push("Tor Detected".to_string());
        }
        if self.location.gps_spoofing_suspected {
            alerts.push("GPS Spoofing Suspected".to_string());
        }
        if self.threat.botnet_member {
            alerts.push("Botnet Behavior".to_string());
        }
        if self.security.shadow_banned {
            alerts.push("Shadow Banned".to_string());
        }
        if self.correlation.confidence > 80.0 {
            alerts.push("Multi-Device User".to_string());
        }
        self.moderator_alerts = alerts;
    }

    // ═══════════════════════════════════════════════════════════════════
    // Quarantine
    // ═══════════════════════════════════════════════════════════════════

    /// The auto-quarantine predicate.
    #[must_use]
    pub fn should_quarantine(&self) -> bool {
        self.security.risk_tier == RiskTier::Critical
            || self.threat.threat_confidence > 85.0
            || self.security.spam_reports > 5
            || self.location.gps_spoofing_suspected
            || (self.anomaly.score > 90.0 && self.security.trust_score < 30.0)
    }

    /// Impose a quarantine with a review deadline and record it.
    pub fn schedule_quarantine_review(
        &mut self,
        reason: impl Into<String>,
        duration: chrono::Duration,
        trigger: QuarantineTrigger,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        self.security.quarantine = QuarantineState {
            active: true,
            until: Some(now + duration),
            reason: Some(reason.clone()),
        };
        self.add_quarantine_event(QuarantineEvent {
            reason,
            triggered_by: trigger,
            timestamp: now,
            reviewed_by: None,
            review_timestamp: None,
            auto_release_scheduled: true,
        });
    }

    /// Lazily lift an expired quarantine. Returns `true` if state changed.
    ///
    /// Permanent bans never lift.
    pub fn check_quarantine_expiry(&mut self, now: DateTime<Utc>) -> bool {
        if self.security.permanently_banned || !self.security.quarantine.active {
            return false;
        }
        match self.security.quarantine.until {
            Some(until) if until <= now => {
                self.security.quarantine = QuarantineState::default();
                true
            }
            _ => false,
        }
    }

    /// Lazy-expiry quarantine check.
    pub fn is_quarantined(&mut self, now: DateTime<Utc>) -> bool {
        if self.security.permanently_banned {
            return true;
        }
        self.check_quarantine_expiry(now);
        self.security.quarantine.active
    }

    /// Moderator release: clears the quarantine and records who did it.
    pub fn release_quarantine(&mut self, moderator: impl Into<String>, now: DateTime<Utc>) {
        self.security.quarantine = QuarantineState::default();
        self.add_quarantine_event(QuarantineEvent {
            reason: "Released by moderator".to_string(),
            triggered_by: QuarantineTrigger::Moderator,
            timestamp: now,
            reviewed_by: Some(moderator.into()),
            review_timestamp: Some(now),
            auto_release_scheduled: false,
        });
    }

    /// Record a quarantine lifecycle entry, newest first, capped.
    pub fn add_quarantine_event(&mut self, event: QuarantineEvent) {
        self.quarantine_history.insert(0, event);
        self.quarantine_history.truncate(QUARANTINE_HISTORY_CAP);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Validation History
    // ═══════════════════════════════════════════════════════════════════

    /// Whether this device already validated the given report.
    #[must_use]
    pub fn has_validated(&self, report_id: ReportId) -> bool {
        self.security
            .validation_history
            .iter()
            .any(|record| record.report_id == report_id)
    }

    /// Record a validation act and refresh the accuracy rate.
    pub fn record_validation(&mut self, report_id: ReportId, is_positive: bool, now: DateTime<Utc>) {
        self.security.validation_history.insert(
            0,
            ValidationRecord {
                report_id,
                timestamp: now,
                is_positive,
            },
        );
        self.cleanup_validation_history();

        self.security.total_validations_given += 1;
        if is_positive {
            self.security.accurate_validations += 1;
        } else {
            self.security.inaccurate_validations += 1;
        }
        self.security.validation_accuracy_rate = f64::from(self.security.accurate_validations)
            / f64::from(self.security.total_validations_given)
            * 100.0;
        self.activity.validation_usage += 1;
    }

    /// Enforce the validation-log cap, newest-first eviction.
    pub fn cleanup_validation_history(&mut self) {
        self.security.validation_history.truncate(VALIDATION_LOG_CAP);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Activity & Submission Patterns
    // ═══════════════════════════════════════════════════════════════════

    /// Update activity tracking for a submission: last-seen, session
    /// count, engagement score, hourly/daily histograms, peak hours and
    /// the suspicious-time-pattern flag.
    pub fn update_activity(&mut self, now: DateTime<Utc>) {
        self.activity.last_seen = now;
        self.activity.total_sessions += 1;

        let session_quality = (self.activity.average_session_duration / 10.0 * 20.0).min(100.0);
        let participation_quality = (self.activity.community_participation * 10.0).min(100.0);
        let trust_factor = self.security.trust_score;
        self.activity.engagement_score =
            ((session_quality + participation_quality + trust_factor) / 3.0).round();

        let hour = now.hour() as usize;
        self.submission_pattern.hourly_distribution[hour] += 1;
        let weekday = now.weekday().num_days_from_monday() as usize;
        self.submission_pattern.daily_distribution[weekday] += 1;

        self.recompute_peak_hours();

        let total = self.submission_pattern.total();
        self.submission_pattern.suspicious_time_patterns =
            self.submission_pattern.peak_hours.len() <= 2 && total > 20;
    }

    fn recompute_peak_hours(&mut self) {
        let max = self
            .submission_pattern
            .hourly_distribution
            .iter()
            .copied()
            .max()
            .unwrap_or(0);
        self.submission_pattern.peak_hours = if max == 0 {
            Vec::new()
        } else {
            self.submission_pattern
                .hourly_distribution
                .iter()
                .enumerate()
                .filter(|(_, count)| **count == max)
                .map(|(hour, _)| hour as u8)
                .collect()
        };
    }

    /// Count a submitted report.
    pub fn mark_report_submitted(&mut self) {
        self.security.total_reports_submitted += 1;
        self.activity.reporting_usage += 1;
    }

    /// Count a spam-classified report.
    ///
    /// The `spam_suspected` anomaly flag is owned by deep analysis
    /// (content similarity), not by this counter; the counter alone
    /// drives the quarantine predicate once it crosses its threshold.
    pub fn mark_spam_report(&mut self) {
        self.security.spam_reports += 1;
    }

    /// Count a moderation outcome for a report from this device.
    pub fn mark_moderation_outcome(&mut self, approved: bool) {
        if approved {
            self.security.approved_reports += 1;
        } else {
            self.security.rejected_reports += 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Signature Drift
    // ═══════════════════════════════════════════════════════════════════

    /// Replace the signature, detecting drift against the previous one.
    ///
    /// Captures a [`SignatureSnapshot`] of the old drift-sensitive fields,
    /// accrues an anomaly penalty of 10 per changed field, and requests
    /// high-priority deep analysis when anything changed. Returns the
    /// number of changed fields.
    pub fn update_signature(&mut self, new: DeviceSignature, now: DateTime<Utc>) -> usize {
        let mut new = new;
        new.rehash_user_agent();

        let changes = [
            self.signature.user_agent != new.user_agent,
            self.signature.screen_resolution != new.screen_resolution,
            self.signature.timezone != new.timezone,
            self.signature.platform != new.platform,
        ]
        .iter()
        .filter(|changed| **changed)
        .count();

        if changes > 0 {
            self.previous_signature = Some(SignatureSnapshot {
                user_agent: self.signature.user_agent.clone(),
                screen_resolution: self.signature.screen_resolution.clone(),
                timezone: self.signature.timezone.clone(),
                platform: self.signature.platform.clone(),
                timestamp: now,
            });
            self.anomaly.signature_drift_penalty += 10.0 * changes as f64;
        }

        self.signature = new;
        changes
    }

    // ═══════════════════════════════════════════════════════════════════
    // Pre-save Fast Path
    // ═══════════════════════════════════════════════════════════════════

    /// Synchronous fast-path anomaly evaluation.
    ///
    /// Starts from the previous score (the smoothing anchor), re-applies
    /// the additive factors, folds in any pending signature-drift
    /// penalty, clamps to 0–100 and enforces the per-save movement cap.
    fn refresh_anomaly(&mut self, smoothing_delta: f64) {
        let previous = self.anomaly.previous_score;
        let mut score = previous;

        if self.network.vpn_suspected || self.network.proxy_detected || self.network.tor_detected {
            score += 20.0;
        }
        if self.behavior.human_behavior_score < 30.0 {
            score += 15.0;
        }
        if self.location.cross_border_activity {
            score += 25.0;
        }
        if self.security.spam_suspected {
            score += 10.0;
        }
        if self.security.spoofing_suspected {
            score += 15.0;
        }
        score += self.anomaly.signature_drift_penalty;
        self.anomaly.signature_drift_penalty = 0.0;

        score = score.clamp(0.0, 100.0);

        let delta = score - previous;
        if delta.abs() > smoothing_delta {
            score = previous + smoothing_delta.copysign(delta);
        }

        self.anomaly.score = score;
        self.anomaly.previous_score = score;
    }

    /// Run the fixed pre-save hook chain: trust → risk → anomaly
    /// smoothing → alert rebuild → quarantine predicate.
    ///
    /// `anomaly_inputs_changed` must be `true` when security, network,
    /// behavior, location or signature state was modified, or when the
    /// document is new; the anomaly path only runs then.
    pub fn run_presave(
        &mut self,
        anomaly_inputs_changed: bool,
        smoothing_delta: f64,
        quarantine_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> PresaveOutcome {
        self.security.trust_score = self.calculate_trust_score(now);
        self.security.risk_tier = self.assess_risk_tier();

        let mut analysis_requested = None;
        if anomaly_inputs_changed {
            let drift_pending = self.anomaly.signature_drift_penalty > 0.0;
            self.refresh_anomaly(smoothing_delta);

            let newly_marked = !self.anomaly.needs_detailed_analysis;
            let previous_priority = self.anomaly.analysis_priority;
            self.anomaly.needs_detailed_analysis = true;
            self.anomaly.analysis_priority = if self.security.risk_tier == RiskTier::Critical {
                AnalysisPriority::Critical
            } else if self.anomaly.score > 70.0 || drift_pending {
                // Signature drift always escalates.
                AnalysisPriority::High
            } else {
                AnalysisPriority::Medium
            };
            // Enqueue when the request is new, escalated, or driven by a
            // fresh drift; a pending request at equal priority stays
            // queued once.
            if newly_marked || drift_pending || self.anomaly.analysis_priority > previous_priority
            {
                analysis_requested = Some(self.anomaly.analysis_priority);
            }
        }

        self.rebuild_moderator_alerts();

        let mut newly_quarantined = false;
        if self.should_quarantine() && !self.security.quarantine.active {
            self.schedule_quarantine_review(
                "Auto-quarantined: risk/spam/spoofing threshold crossed",
                quarantine_duration,
                QuarantineTrigger::Auto,
                now,
            );
            newly_quarantined = true;
        }

        PresaveOutcome {
            high_risk: matches!(self.security.risk_tier, RiskTier::High | RiskTier::Critical),
            newly_quarantined,
            analysis_requested,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn device() -> Device {
        Device::new(FingerprintId::new("fp-test").unwrap(), Utc::now())
    }

    #[test]
    fn new_device_has_neutral_scores() {
        let d = device();
        assert_eq!(d.security.trust_score, 50.0);
        assert_eq!(d.security.risk_tier, RiskTier::Medium);
        assert_eq!(d.anomaly.score, 0.0);
    }

    #[test]
    fn trust_rewards_approvals_and_behavior() {
        let now = Utc::now();
        let mut d = device();
        d.security.total_reports_submitted = 10;
        d.security.approved_reports = 10;
        d.behavior.human_behavior_score = 80.0;
        d.security.validation_accuracy_rate = 90.0;
        d.region.likely_from_bd = true;
        // 50 + 30 + 20 + 15 + 10 (local, no VPN) = 100+, clamps.
        assert_eq!(d.calculate_trust_score(now), 100.0);
    }

    #[test]
    fn trust_punishes_botnet_and_spam() {
        let now = Utc::now();
        let mut d = device();
        d.security.spam_reports = 3;
        d.threat.botnet_member = true;
        // 50 - 30 - 50 = -30, clamps to 0.
        assert_eq!(d.calculate_trust_score(now), 0.0);
    }

    #[test]
    fn trust_blends_with_correlated_cluster() {
        let now = Utc::now();
        let mut d = device();
        d.correlation.confidence = 80.0;
        d.correlation.related_devices = vec![FingerprintId::new("fp-2").unwrap()];
        d.correlation.related_trust_avg = Some(20.0);
        // Base 50, blended 50/50 with the cluster's 20 → 35.
        assert_eq!(d.calculate_trust_score(now), 35.0);
    }

    #[test]
    fn long_term_reliability_needs_age_and_volume() {
        let now = Utc::now();
        let mut d = device();
        d.security.total_reports_submitted = 10;
        d.security.approved_reports = 10;
        d.activity.first_seen = now - Duration::days(40);
        let with_age = d.calculate_trust_score(now);

        d.activity.first_seen = now - Duration::days(5);
        let without_age = d.calculate_trust_score(now);
        assert!(with_age > without_age);
    }

    #[test]
    fn risk_tier_ordering() {
        let mut d = device();
        d.security.trust_score = 85.0;
        d.threat.threat_confidence = 10.0;
        d.anomaly.score = 10.0;
        assert_eq!(d.assess_risk_tier(), RiskTier::VeryLow);

        d.anomaly.score = 45.0;
        assert_eq!(d.assess_risk_tier(), RiskTier::Medium);

        d.anomaly.score = 65.0;
        assert_eq!(d.assess_risk_tier(), RiskTier::High);

        d.threat.botnet_member = true;
        assert_eq!(d.assess_risk_tier(), RiskTier::Critical);
    }

    #[test]
    fn anomaly_jump_clamps_to_smoothing_delta() {
        let mut d = device();
        d.anomaly.previous_score = 40.0;
        d.network.vpn_suspected = true;
        d.location.cross_border_activity = true;
        d.security.spoofing_suspected = true;
        d.behavior.human_behavior_score = 10.0;
        // 40 + 20 + 25 + 15 + 15 = 115 → clamp 100 → smoothing 55.
        d.refresh_anomaly(15.0);
        assert_eq!(d.anomaly.score, 55.0);
        assert_eq!(d.anomaly.previous_score, 55.0);
    }

    #[test]
    fn anomaly_descends_no_faster_than_delta() {
        let mut d = device();
        d.anomaly.previous_score = 60.0;
        // No factors at all → target 60 (anchor) stays put.
        d.refresh_anomaly(15.0);
        assert_eq!(d.anomaly.score, 60.0);
    }

    #[test]
    fn signature_drift_penalty_feeds_anomaly_once() {
        let now = Utc::now();
        let mut d = device();
        d.signature.user_agent = Some("UA-1".to_string());
        d.signature.platform = Some("Linux".to_string());

        let mut new_sig = d.signature.clone();
        new_sig.user_agent = Some("UA-2".to_string());
        let changes = d.update_signature(new_sig, now);
        assert_eq!(changes, 1);
        assert!(d.previous_signature.is_some());
        assert_eq!(d.anomaly.signature_drift_penalty, 10.0);

        let outcome = d.run_presave(true, 15.0, Duration::hours(24), now);
        assert_eq!(d.anomaly.score, 10.0);
        assert!(d.anomaly.needs_detailed_analysis);
        assert_eq!(outcome.analysis_requested, Some(AnalysisPriority::High));

        // Penalty consumed and the request stays queued: the next save
        // neither re-applies the bump nor re-enqueues.
        let outcome = d.run_presave(true, 15.0, Duration::hours(24), now);
        assert_eq!(d.anomaly.score, 10.0);
        assert_eq!(outcome.analysis_requested, None);
    }

    #[test]
    fn unchanged_signature_is_not_drift() {
        let now = Utc::now();
        let mut d = device();
        d.signature.user_agent = Some("UA-1".to_string());
        let same = d.signature.clone();
        assert_eq!(d.update_signature(same, now), 0);
        assert!(d.previous_signature.is_none());
    }

    #[test]
    fn quarantine_predicate_matches_spec() {
        let mut d = device();
        assert!(!d.should_quarantine());

        d.security.spam_reports = 6;
        assert!(d.should_quarantine());

        let mut d = device();
        d.location.gps_spoofing_suspected = true;
        assert!(d.should_quarantine());

        let mut d = device();
        d.anomaly.score = 95.0;
        d.security.trust_score = 25.0;
        assert!(d.should_quarantine());

        let mut d = device();
        d.anomaly.score = 95.0;
        d.security.trust_score = 50.0;
        // High anomaly alone is not enough below the critical tier…
        d.security.risk_tier = RiskTier::High;
        assert!(!d.should_quarantine());
    }

    #[test]
    fn quarantine_lifts_lazily_after_deadline() {
        let now = Utc::now();
        let mut d = device();
        d.schedule_quarantine_review("test", Duration::hours(24), QuarantineTrigger::Auto, now);
        assert!(d.is_quarantined(now));
        assert!(d.is_quarantined(now + Duration::hours(23)));
        assert!(!d.is_quarantined(now + Duration::hours(25)));
        assert!(!d.security.quarantine.active);
        assert_eq!(d.quarantine_history.len(), 1);
        assert!(d.quarantine_history[0].auto_release_scheduled);
    }

    #[test]
    fn permanent_ban_never_lifts() {
        let now = Utc::now();
        let mut d = device();
        d.security.permanently_banned = true;
        assert!(d.is_quarantined(now + Duration::days(365)));
    }

    #[test]
    fn moderator_release_records_reviewer() {
        let now = Utc::now();
        let mut d = device();
        d.schedule_quarantine_review("test", Duration::hours(24), QuarantineTrigger::Auto, now);
        d.release_quarantine("alice", now);
        assert!(!d.security.quarantine.active);
        assert_eq!(d.quarantine_history[0].triggered_by, QuarantineTrigger::Moderator);
        assert_eq!(d.quarantine_history[0].reviewed_by.as_deref(), Some("alice"));
    }

    #[test]
    fn validation_log_capped_newest_first() {
        let now = Utc::now();
        let mut d = device();
        for _ in 0..(VALIDATION_LOG_CAP + 20) {
            d.record_validation(ReportId::new(), true, now);
        }
        assert_eq!(d.security.validation_history.len(), VALIDATION_LOG_CAP);
        assert_eq!(
            d.security.total_validations_given,
            (VALIDATION_LOG_CAP + 20) as u32
        );
        assert_eq!(d.security.validation_accuracy_rate, 100.0);
    }

    #[test]
    fn duplicate_validation_is_detectable() {
        let now = Utc::now();
        let mut d = device();
        let report = ReportId::new();
        assert!(!d.has_validated(report));
        d.record_validation(report, false, now);
        assert!(d.has_validated(report));
    }

    #[test]
    fn histograms_track_submissions() {
        let now = Utc::now();
        let mut d = device();
        d.update_activity(now);
        d.update_activity(now);
        assert_eq!(d.submission_pattern.total(), 2);
        assert_eq!(
            d.submission_pattern.peak_hours,
            vec![now.hour() as u8]
        );
        assert!(!d.submission_pattern.suspicious_time_patterns);
    }

    #[test]
    fn concentrated_submissions_flag_time_patterns() {
        let now = Utc::now();
        let mut d = device();
        for _ in 0..25 {
            d.update_activity(now);
        }
        // 25 submissions in a single peak hour.
        assert!(d.submission_pattern.suspicious_time_patterns);
    }

    #[test]
    fn presave_runs_fixed_chain() {
        let now = Utc::now();
        let mut d = device();
        d.network.tor_detected = true;
        d.behavior.human_behavior_score = 20.0;

        let outcome = d.run_presave(true, 15.0, Duration::hours(24), now);

        // Anomaly moved by at most the smoothing delta.
        assert_eq!(d.anomaly.score, 15.0);
        assert!(d.anomaly.needs_detailed_analysis);
        assert_eq!(outcome.analysis_requested, Some(AnalysisPriority::Medium));
        assert!(!d.moderator_alerts.is_empty());
        assert!(d.moderator_alerts.contains(&"Tor Detected".to_string()));
    }

    #[test]
    fn presave_quarantines_spammer() {
        let now = Utc::now();
        let mut d = device();
        for _ in 0..6 {
            d.mark_spam_report();
        }
        let outcome = d.run_presave(true, 15.0, Duration::hours(24), now);
        assert!(outcome.newly_quarantined);
        assert!(d.security.quarantine.active);
        let until = d.security.quarantine.until.unwrap_or(now);
        assert_eq!(until, now + Duration::hours(24));
    }

    #[test]
    fn presave_idempotent_on_unchanged_device() {
        let now = Utc::now();
        let mut d = device();
        d.run_presave(true, 15.0, Duration::hours(24), now);
        let snapshot = (
            d.security.trust_score,
            d.security.risk_tier,
            d.anomaly.score,
        );
        d.run_presave(false, 15.0, Duration::hours(24), now);
        assert_eq!(
            snapshot,
            (
                d.security.trust_score,
                d.security.risk_tier,
                d.anomaly.score
            )
        );
    }

    #[test]
    fn scores_stay_in_bounds_under_extremes() {
        let now = Utc::now();
        let mut d = device();
        d.threat.botnet_member = true;
        d.threat.coordinated_attack_participant = true;
        d.security.spam_reports = 100;
        d.region.cross_border_suspicion = 100.0;
        d.security.shadow_banned = true;
        d.anomaly.previous_score = 100.0;
        d.network.tor_detected = true;
        d.location.cross_border_activity = true;

        for _ in 0..10 {
            d.run_presave(true, 15.0, Duration::hours(24), now);
            assert!((0.0..=100.0).contains(&d.security.trust_score));
            assert!((0.0..=100.0).contains(&d.anomaly.score));
        }
    }
}
