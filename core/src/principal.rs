//! Principal aggregate: humans behind requests.
//!
//! A principal is either operator-provisioned (admin, officer,
//! researcher) or minted from an ephemeral anonymous request at its
//! first durable write. The role discriminator determines which payload
//! is populated; permission checks dispatch on it. Principals are never
//! hard-deleted; disablement is the permanent-ban flag plus quarantine.

use crate::device::{DeviceType, QuarantineState};
use crate::error::{CoreError, Result};
use crate::types::{EventSeverity, FingerprintId, PrincipalId, RiskTier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Security-event log entries kept per principal, newest first.
pub const SECURITY_EVENT_CAP: usize = 50;

/// Device associations kept per principal, most recently used first.
pub const ASSOCIATED_DEVICE_CAP: usize = 10;

/// Bcrypt cost for admin password hashing.
const BCRYPT_COST: u32 = 12;

// ═══════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════

/// Role discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unauthenticated citizen.
    Anonymous,
    /// Platform administrator.
    Admin,
    /// Law-enforcement officer.
    Officer,
    /// Academic researcher.
    Researcher,
}

impl Role {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Admin => "admin",
            Self::Officer => "officer",
            Self::Researcher => "researcher",
        }
    }
}

/// Grantable permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Approve/reject/flag/delete reports.
    Moderation,
    /// Read aggregated statistics.
    Analytics,
    /// Provision and manage principals.
    UserManagement,
    /// Manage safe zones.
    SafeZones,
    /// Read security dashboards and device listings.
    SecurityMonitoring,
    /// Grants everything.
    SuperAdmin,
}

/// Admin role payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminProfile {
    /// Login username.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Bcrypt password hash; absent until a password is set.
    pub password_hash: Option<String>,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Admin level 1–10.
    pub admin_level: u8,
    /// Two-factor enabled.
    pub two_factor_enabled: bool,
    /// Two-factor secret, when enrolled.
    pub two_factor_secret: Option<String>,
    /// Failed logins inside the current attempt window.
    pub login_attempts: u32,
    /// Start of the current attempt window.
    pub first_failed_attempt: Option<DateTime<Utc>>,
    /// Lock deadline after too many failures.
    pub lock_until: Option<DateTime<Utc>>,
    /// Email verified.
    pub email_verified: bool,
    /// Pending email-verification token.
    pub email_verification_token: Option<String>,
    /// Pending password-reset token.
    pub password_reset_token: Option<String>,
    /// Password-reset token expiry.
    pub password_reset_expires: Option<DateTime<Utc>>,
    /// Last successful login.
    pub last_login: Option<DateTime<Utc>>,
}

/// Officer verification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Awaiting review.
    #[default]
    Pending,
    /// Verified by an admin.
    Verified,
    /// Rejected.
    Rejected,
}

/// Officer access tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfficerAccess {
    /// Read-only dashboards.
    #[default]
    ReadOnly,
    /// Standard operational access.
    Standard,
    /// Supervisor access.
    Supervisor,
    /// Chief access.
    Chief,
}

/// Officer role payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficerProfile {
    /// Badge number.
    pub badge_number: String,
    /// Department.
    pub department: String,
    /// Verification state.
    pub verification_status: VerificationStatus,
    /// Access tier.
    pub access_level: OfficerAccess,
}

/// Researcher approval state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearcherApproval {
    /// Awaiting review.
    #[default]
    Pending,
    /// Approved.
    Approved,
    /// Rejected.
    Rejected,
}

/// Researcher access tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearcherAccess {
    /// Aggregates only.
    #[default]
    Basic,
    /// Full read access.
    Full,
    /// Programmatic access.
    ApiAccess,
}

/// Researcher role payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearcherProfile {
    /// Affiliated institution.
    pub institution: String,
    /// Research proposal summary.
    pub research_proposal: String,
    /// Approval state.
    pub approval_status: ResearcherApproval,
    /// Access tier.
    pub access_level: ResearcherAccess,
}

/// Anonymous role payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnonymousProfile {
    /// Fingerprint the principal was promoted from.
    pub device_fingerprint: Option<FingerprintId>,
    /// Preferred language.
    pub preferred_language: Option<String>,
}

/// Role payload: exactly one variant is populated per principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    /// Anonymous citizen.
    Anonymous(AnonymousProfile),
    /// Administrator.
    Admin(AdminProfile),
    /// Officer.
    Officer(OfficerProfile),
    /// Researcher.
    Researcher(ResearcherProfile),
}

impl RoleProfile {
    /// The role discriminator.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Anonymous(_) => Role::Anonymous,
            Self::Admin(_) => Role::Admin,
            Self::Officer(_) => Role::Officer,
            Self::Researcher(_) => Role::Researcher,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Profiles
// ═══════════════════════════════════════════════════════════════════════

/// One device bound to this principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssociation {
    /// Device fingerprint.
    pub fingerprint_id: FingerprintId,
    /// Form factor at association time.
    pub device_type: DeviceType,
    /// Most recent use through this principal.
    pub last_used: DateTime<Utc>,
    /// Device trust tier at last use.
    pub trust_tier: RiskTier,
    /// Primary device flag.
    pub is_primary: bool,
}

/// One security incident recorded against this principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Machine-readable event type.
    pub event_type: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Free-form detail.
    pub details: String,
    /// Device involved, when known.
    pub device_fingerprint: Option<FingerprintId>,
    /// Severity; critical events auto-quarantine the principal.
    pub severity: EventSeverity,
}

/// Principal security profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalSecurityProfile {
    /// Devices bound to this principal, most recently used first,
    /// capped at [`ASSOCIATED_DEVICE_CAP`].
    pub associated_devices: Vec<DeviceAssociation>,
    /// Primary device; always present in `associated_devices` when set.
    pub primary_device: Option<FingerprintId>,
    /// Overall trust, 0–100.
    pub overall_trust_score: f64,
    /// Coarse risk classification.
    pub risk_tier: RiskTier,
    /// Quarantine state.
    pub quarantine: QuarantineState,
    /// Bounded incident log, newest first.
    pub security_events: Vec<SecurityEvent>,
    /// Permanent ban; modeled disablement.
    pub permanently_banned: bool,
    /// Last security sweep over this principal.
    pub last_security_check: DateTime<Utc>,
}

impl PrincipalSecurityProfile {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            associated_devices: Vec::new(),
            primary_device: None,
            overall_trust_score: 50.0,
            risk_tier: RiskTier::Medium,
            quarantine: QuarantineState::default(),
            security_events: Vec::new(),
            permanently_banned: false,
            last_security_check: now,
        }
    }
}

/// Feature-usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureUsage {
    /// Report submissions.
    pub reporting: u64,
    /// Map views.
    pub map_viewing: u64,
    /// Community validations.
    pub validation: u64,
    /// Admin panel usage.
    pub admin_panel: u64,
    /// Analytics usage.
    pub analytics: u64,
}

/// Contribution metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionMetrics {
    /// Reports submitted.
    pub reports_submitted: u32,
    /// Reports approved.
    pub reports_approved: u32,
    /// Validations given.
    pub validations_given: u32,
    /// Validation accuracy, 0–100.
    pub validation_accuracy: f64,
    /// Community reputation, 0–100.
    pub community_reputation: f64,
}

impl Default for ContributionMetrics {
    fn default() -> Self {
        Self {
            reports_submitted: 0,
            reports_approved: 0,
            validations_given: 0,
            validation_accuracy: 0.0,
            community_reputation: 50.0,
        }
    }
}

/// Activity profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProfile {
    /// First request.
    pub first_seen: DateTime<Utc>,
    /// Most recent request.
    pub last_seen: DateTime<Utc>,
    /// Sessions observed.
    pub total_sessions: u64,
    /// Active minutes, lifetime.
    pub total_active_minutes: u64,
    /// Feature-usage counters.
    pub feature_usage: FeatureUsage,
    /// Contribution metrics.
    pub contribution: ContributionMetrics,
}

impl ActivityProfile {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            total_sessions: 1,
            total_active_minutes: 0,
            feature_usage: FeatureUsage::default(),
            contribution: ContributionMetrics::default(),
        }
    }
}

/// UI theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Light theme.
    #[default]
    Light,
    /// Dark theme.
    Dark,
    /// Follow the system.
    Auto,
}

/// Map display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MapView {
    /// Individual markers.
    Markers,
    /// Heatmap.
    Heatmap,
    /// Clustered markers.
    #[default]
    Clusters,
}

/// Notification channel toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    /// Email notifications.
    pub email: bool,
    /// Push notifications.
    pub push: bool,
    /// Security notifications.
    pub security: bool,
    /// Community notifications.
    pub community: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            email: false,
            push: true,
            security: true,
            community: true,
        }
    }
}

/// Map preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSettings {
    /// Default display mode.
    pub default_view: MapView,
    /// Auto-center on the user.
    pub auto_location: bool,
    /// Show safe zones.
    pub show_safe_zones: bool,
    /// Show female-safety incidents.
    pub show_female_incidents: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            default_view: MapView::default(),
            auto_location: true,
            show_safe_zones: true,
            show_female_incidents: true,
        }
    }
}

/// Female-safety mode toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FemaleSafetyMode {
    /// Mode enabled.
    pub enabled: bool,
    /// Enhanced privacy.
    pub enhanced_privacy: bool,
    /// Restrict validation to female validators.
    pub female_only_validation: bool,
    /// Cultural sensitivity features.
    pub cultural_sensitivity: bool,
}

impl Default for FemaleSafetyMode {
    fn default() -> Self {
        Self {
            enabled: false,
            enhanced_privacy: true,
            female_only_validation: false,
            cultural_sensitivity: true,
        }
    }
}

/// Principal preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Interface language.
    pub language: String,
    /// Theme.
    pub theme: Theme,
    /// Notification channels.
    pub notifications: NotificationPrefs,
    /// Map settings.
    pub map: MapSettings,
    /// Female-safety mode.
    pub female_safety: FemaleSafetyMode,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            theme: Theme::default(),
            notifications: NotificationPrefs::default(),
            map: MapSettings::default(),
            female_safety: FemaleSafetyMode::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Principal Aggregate
// ═══════════════════════════════════════════════════════════════════════

/// The principal aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable opaque identifier.
    pub id: PrincipalId,
    /// Role payload; the variant is the role discriminator.
    pub role_profile: RoleProfile,
    /// Security profile.
    pub security: PrincipalSecurityProfile,
    /// Activity profile.
    pub activity: ActivityProfile,
    /// Preferences.
    pub preferences: Preferences,
    /// In-memory only: never persisted as `true`. Set on principals
    /// synthesized for a single request before promotion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
    /// Optimistic concurrency token; the store bumps it on every write.
    pub revision: u64,
}

impl Principal {
    /// Create a persistent anonymous principal promoted from a device.
    #[must_use]
    pub fn new_anonymous_from_device(fingerprint: FingerprintId, now: DateTime<Utc>) -> Self {
        let mut security = PrincipalSecurityProfile::new(now);
        security.primary_device = Some(fingerprint.clone());
        security.associated_devices.push(DeviceAssociation {
            fingerprint_id: fingerprint.clone(),
            device_type: DeviceType::Unknown,
            last_used: now,
            trust_tier: RiskTier::Medium,
            is_primary: true,
        });
        Self {
            id: PrincipalId::new_anonymous(now),
            role_profile: RoleProfile::Anonymous(AnonymousProfile {
                device_fingerprint: Some(fingerprint),
                preferred_language: None,
            }),
            security,
            activity: ActivityProfile::new(now),
            preferences: Preferences::default(),
            ephemeral: false,
            revision: 0,
        }
    }

    /// Create an ephemeral anonymous principal for a single request.
    #[must_use]
    pub fn new_ephemeral(now: DateTime<Utc>) -> Self {
        Self {
            id: PrincipalId::new_ephemeral(now),
            role_profile: RoleProfile::Anonymous(AnonymousProfile::default()),
            security: PrincipalSecurityProfile::new(now),
            activity: ActivityProfile::new(now),
            preferences: Preferences::default(),
            ephemeral: true,
            revision: 0,
        }
    }

    /// Provision an admin principal.
    #[must_use]
    pub fn new_admin(
        username: impl Into<String>,
        email: impl Into<String>,
        admin_level: u8,
        permissions: Vec<Permission>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PrincipalId::new(),
            role_profile: RoleProfile::Admin(AdminProfile {
                username: username.into(),
                email: email.into(),
                password_hash: None,
                permissions,
                admin_level: admin_level.clamp(1, 10),
                two_factor_enabled: false,
                two_factor_secret: None,
                login_attempts: 0,
                first_failed_attempt: None,
                lock_until: None,
                email_verified: false,
                email_verification_token: None,
                password_reset_token: None,
                password_reset_expires: None,
                last_login: None,
            }),
            security: PrincipalSecurityProfile::new(now),
            activity: ActivityProfile::new(now),
            preferences: Preferences::default(),
            ephemeral: false,
            revision: 0,
        }
    }

    /// Provision an officer principal (verification pending).
    #[must_use]
    pub fn new_officer(
        badge_number: impl Into<String>,
        department: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PrincipalId::new(),
            role_profile: RoleProfile::Officer(OfficerProfile {
                badge_number: badge_number.into(),
                department: department.into(),
                verification_status: VerificationStatus::default(),
                access_level: OfficerAccess::default(),
            }),
            security: PrincipalSecurityProfile::new(now),
            activity: ActivityProfile::new(now),
            preferences: Preferences::default(),
            ephemeral: false,
            revision: 0,
        }
    }

    /// Provision a researcher principal (approval pending).
    #[must_use]
    pub fn new_researcher(
        institution: impl Into<String>,
        research_proposal: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PrincipalId::new(),
            role_profile: RoleProfile::Researcher(ResearcherProfile {
                institution: institution.into(),
                research_proposal: research_proposal.into(),
                approval_status: ResearcherApproval::default(),
                access_level: ResearcherAccess::default(),
            }),
            security: PrincipalSecurityProfile::new(now),
            activity: ActivityProfile::new(now),
            preferences: Preferences::default(),
            ephemeral: false,
            revision: 0,
        }
    }

    /// The role discriminator.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role_profile.role()
    }

    /// The admin payload, if this is an admin.
    #[must_use]
    pub const fn admin(&self) -> Option<&AdminProfile> {
        match &self.role_profile {
            RoleProfile::Admin(admin) => Some(admin),
            _ => None,
        }
    }

    fn admin_mut(&mut self) -> Result<&mut AdminProfile> {
        match &mut self.role_profile {
            RoleProfile::Admin(admin) => Ok(admin),
            _ => Err(CoreError::ForbiddenRole {
                required: "admin".to_string(),
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Credentials & Lockout (admin variant)
    // ═══════════════════════════════════════════════════════════════════

    /// Set the password (admin variant only). Bcrypt, cost 12.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals;
    /// [`CoreError::Internal`] if hashing fails.
    pub fn set_password(&mut self, plaintext: &str) -> Result<()> {
        let admin = self.admin_mut()?;
        let hash = bcrypt::hash(plaintext, BCRYPT_COST)
            .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))?;
        admin.password_hash = Some(hash);
        Ok(())
    }

    /// Compare a candidate password against the stored hash.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals;
    /// [`CoreError::Unauthenticated`] when no password is set;
    /// [`CoreError::Internal`] if verification fails.
    pub fn compare_password(&self, plaintext: &str) -> Result<bool> {
        let admin = match &self.role_profile {
            RoleProfile::Admin(admin) => admin,
            _ => {
                return Err(CoreError::ForbiddenRole {
                    required: "admin".to_string(),
                })
            }
        };
        let hash = admin
            .password_hash
            .as_ref()
            .ok_or(CoreError::Unauthenticated)?;
        bcrypt::verify(plaintext, hash)
            .map_err(|e| CoreError::Internal(format!("password verification failed: {e}")))
    }

    /// Whether the admin account is currently locked.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.admin()
            .and_then(|admin| admin.lock_until)
            .is_some_and(|until| until > now)
    }

    /// Record a failed login attempt.
    ///
    /// Attempts accumulate inside `attempt_window`; reaching
    /// `max_attempts` locks the account for `lock_duration`. Returns
    /// `true` if this attempt locked the account.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals.
    pub fn increment_login_attempts(
        &mut self,
        max_attempts: u32,
        attempt_window: Duration,
        lock_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = self.id.clone();
        let admin = self.admin_mut()?;

        // A lapsed window restarts the count.
        let window_open = admin
            .first_failed_attempt
            .is_some_and(|first| now - first < attempt_window);
        if window_open {
            admin.login_attempts += 1;
        } else {
            admin.login_attempts = 1;
            admin.first_failed_attempt = Some(now);
        }

        if admin.login_attempts >= max_attempts {
            admin.lock_until = Some(now + lock_duration);
            tracing::warn!(
                principal_id = %id,
                attempts = admin.login_attempts,
                "Admin account locked after repeated failed logins"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Clear the failed-login counter and any lapsed lock.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals.
    pub fn reset_login_attempts(&mut self) -> Result<()> {
        let admin = self.admin_mut()?;
        admin.login_attempts = 0;
        admin.first_failed_attempt = None;
        admin.lock_until = None;
        Ok(())
    }

    /// Issue a password-reset token valid for `ttl`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals.
    pub fn issue_password_reset_token(
        &mut self,
        token: impl Into<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let admin = self.admin_mut()?;
        admin.password_reset_token = Some(token.into());
        admin.password_reset_expires = Some(now + ttl);
        Ok(())
    }

    /// Consume a password-reset token.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] for non-admin principals;
    /// [`CoreError::InvalidValue`] when the token mismatches or expired.
    pub fn consume_password_reset_token(&mut self, token: &str, now: DateTime<Utc>) -> Result<()> {
        let admin = self.admin_mut()?;
        let stored = admin.password_reset_token.as_deref();
        let expires = admin.password_reset_expires;
        let valid = stored == Some(token) && expires.is_some_and(|at| at > now);
        if !valid {
            return Err(CoreError::InvalidValue {
                field: "password_reset_token",
                reason: "unknown or expired token".to_string(),
            });
        }
        admin.password_reset_token = None;
        admin.password_reset_expires = None;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Security Events & Quarantine
    // ═══════════════════════════════════════════════════════════════════

    /// Record a security event, newest first, capped at
    /// [`SECURITY_EVENT_CAP`]. Critical severity auto-quarantines for
    /// `critical_quarantine` (24 h by default configuration).
    pub fn add_security_event(
        &mut self,
        event: SecurityEvent,
        critical_quarantine: Duration,
        now: DateTime<Utc>,
    ) {
        let critical = event.severity == EventSeverity::Critical;
        let event_type = event.event_type.clone();
        self.security.security_events.insert(0, event);
        self.security.security_events.truncate(SECURITY_EVENT_CAP);

        if critical && !self.security.quarantine.active {
            self.security.quarantine = QuarantineState {
                active: true,
                until: Some(now + critical_quarantine),
                reason: Some(format!("critical security event: {event_type}")),
            };
            tracing::warn!(
                principal_id = %self.id,
                event_type = %event_type,
                "Principal auto-quarantined on critical security event"
            );
        }
    }

    /// Lazily lift an expired quarantine. Returns `true` if state changed.
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

    // ═══════════════════════════════════════════════════════════════════
    // Device Associations
    // ═══════════════════════════════════════════════════════════════════

    /// Upsert a device association; optionally make it primary.
    ///
    /// Returns `true` if the primary device changed.
    pub fn add_device_association(
        &mut self,
        fingerprint_id: FingerprintId,
        device_type: DeviceType,
        trust_tier: RiskTier,
        set_primary: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let devices = &mut self.security.associated_devices;
        if let Some(existing) = devices
            .iter_mut()
            .find(|d| d.fingerprint_id == fingerprint_id)
        {
            existing.last_used = now;
            existing.device_type = device_type;
            existing.trust_tier = trust_tier;
        } else {
            devices.push(DeviceAssociation {
                fingerprint_id: fingerprint_id.clone(),
                device_type,
                last_used: now,
                trust_tier,
                is_primary: false,
            });
        }

        let mut primary_changed = false;
        if set_primary && self.security.primary_device.as_ref() != Some(&fingerprint_id) {
            self.security.primary_device = Some(fingerprint_id.clone());
            primary_changed = true;
        }
        if self.security.primary_device.is_none() {
            self.security.primary_device = Some(fingerprint_id.clone());
            primary_changed = true;
        }

        let primary = self.security.primary_device.clone();
        for device in self.security.associated_devices.iter_mut() {
            device.is_primary = Some(&device.fingerprint_id) == primary.as_ref();
        }

        self.prune_device_associations();
        primary_changed
    }

    /// Keep the most recently used associations, never evicting the
    /// primary device so it always appears in the list.
    fn prune_device_associations(&mut self) {
        let devices = &mut self.security.associated_devices;
        if devices.len() <= ASSOCIATED_DEVICE_CAP {
            return;
        }
        devices.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then(b.last_used.cmp(&a.last_used))
        });
        devices.truncate(ASSOCIATED_DEVICE_CAP);
        devices.sort_by(|a, b| b.last_used.cmp(&a.last_used));
    }

    // ═══════════════════════════════════════════════════════════════════
    // Permissions
    // ═══════════════════════════════════════════════════════════════════

    /// Variant-dispatched permission check.
    ///
    /// Admins hold their granted set; `SuperAdmin` grants everything.
    /// Verified officers read security dashboards and analytics at
    /// `Standard` access or above. Approved researchers read analytics.
    /// Anonymous principals hold nothing.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        match &self.role_profile {
            RoleProfile::Admin(admin) => {
                admin.permissions.contains(&Permission::SuperAdmin)
                    || admin.permissions.contains(&permission)
            }
            RoleProfile::Officer(officer) => {
                officer.verification_status == VerificationStatus::Verified
                    && officer.access_level >= OfficerAccess::Standard
                    && matches!(
                        permission,
                        Permission::SecurityMonitoring | Permission::Analytics
                    )
            }
            RoleProfile::Researcher(researcher) => {
                researcher.approval_status == ResearcherApproval::Approved
                    && permission == Permission::Analytics
            }
            RoleProfile::Anonymous(_) => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Scoring
    // ═══════════════════════════════════════════════════════════════════

    /// Session-quality component of activity quality, 0–100.
    ///
    /// Sweet spot: 5–30 minute average sessions; shorter reads as
    /// drive-by, longer as idle or automated.
    #[must_use]
    pub fn activity_quality(&self, now: DateTime<Utc>) -> f64 {
        let sessions = self.activity.total_sessions.max(1);
        let avg_session_minutes = self.activity.total_active_minutes as f64 / sessions as f64;
        let session_component = if (5.0..=30.0).contains(&avg_session_minutes) {
            50.0
        } else if avg_session_minutes < 5.0 {
            avg_session_minutes / 5.0 * 50.0
        } else {
            30.0 / avg_session_minutes * 50.0
        };

        let age_days = ((now - self.activity.first_seen).num_days().max(1)) as f64;
        let sessions_per_day = self.activity.total_sessions as f64 / age_days;
        let frequency_component = if (0.1..=5.0).contains(&sessions_per_day) {
            50.0
        } else if sessions_per_day < 0.1 {
            sessions_per_day / 0.1 * 50.0
        } else {
            5.0 / sessions_per_day * 50.0
        };

        (session_component + frequency_component).clamp(0.0, 100.0)
    }

    /// Contribution quality, 0–100: approval rate plus validation
    /// accuracy, gated on a minimum participation volume.
    #[must_use]
    pub fn contribution_quality(&self) -> f64 {
        let contribution = &self.activity.contribution;
        let participation = contribution.reports_submitted + contribution.validations_given;
        if participation < 3 {
            // Not enough signal; neutral.
            return 50.0;
        }

        let approval_rate = if contribution.reports_submitted > 0 {
            f64::from(contribution.reports_approved) / f64::from(contribution.reports_submitted)
        } else {
            0.5
        };
        let accuracy = contribution.validation_accuracy / 100.0;
        let participation_bonus = if participation >= 10 { 10.0 } else { 0.0 };

        (approval_rate * 50.0 + accuracy * 40.0 + participation_bonus).clamp(0.0, 100.0)
    }

    /// Recompute the blended security profile: primary-device trust 40%,
    /// activity quality 30%, contribution quality 30%.
    pub fn update_security_profile(&mut self, primary_device_trust: f64, now: DateTime<Utc>) {
        let blended = primary_device_trust * 0.4
            + self.activity_quality(now) * 0.3
            + self.contribution_quality() * 0.3;
        self.security.overall_trust_score = blended.clamp(0.0, 100.0);
        self.security.risk_tier = risk_tier_from_trust(self.security.overall_trust_score);
        self.security.last_security_check = now;
    }

    // ═══════════════════════════════════════════════════════════════════
    // Save Sequence
    // ═══════════════════════════════════════════════════════════════════

    /// Pre-save hook: refresh the security profile when the primary
    /// device changed, prune associations, touch last-seen.
    ///
    /// `primary_device_trust` is the trust score of the current primary
    /// device when the caller has it loaded.
    pub fn run_presave(
        &mut self,
        primary_changed: bool,
        primary_device_trust: Option<f64>,
        now: DateTime<Utc>,
    ) {
        if primary_changed {
            if let Some(trust) = primary_device_trust {
                self.update_security_profile(trust, now);
            }
        }
        self.prune_device_associations();
        self.activity.last_seen = now;
    }

    /// Post-save sweep: lift a lapsed quarantine. Returns `true` when
    /// the caller must persist again (idempotent by guard).
    pub fn run_postsave_sweep(&mut self, now: DateTime<Utc>) -> bool {
        self.check_quarantine_expiry(now)
    }

    /// Whether post-save observability should be notified.
    #[must_use]
    pub const fn is_high_risk(&self) -> bool {
        matches!(
            self.security.risk_tier,
            RiskTier::High | RiskTier::Critical
        )
    }
}

/// Map a blended principal trust score onto a risk tier.
fn risk_tier_from_trust(trust: f64) -> RiskTier {
    if trust < 20.0 {
        RiskTier::Critical
    } else if trust < 40.0 {
        RiskTier::High
    } else if trust < 60.0 {
        RiskTier::Medium
    } else if trust > 80.0 {
        RiskTier::VeryLow
    } else {
        RiskTier::Low
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fp(raw: &str) -> FingerprintId {
        FingerprintId::new(raw).unwrap()
    }

    fn admin() -> Principal {
        Principal::new_admin(
            "alice",
            "alice@example.com",
            5,
            vec![Permission::Moderation],
            Utc::now(),
        )
    }

    #[test]
    fn exactly_one_role_payload() {
        let p = Principal::new_anonymous_from_device(fp("fp-A"), Utc::now());
        assert_eq!(p.role(), Role::Anonymous);
        assert!(p.admin().is_none());

        let a = admin();
        assert_eq!(a.role(), Role::Admin);
        assert!(a.admin().is_some());
    }

    #[test]
    fn password_roundtrip_admin_only() {
        let mut a = admin();
        a.set_password("correct horse").unwrap();
        assert!(a.compare_password("correct horse").unwrap());
        assert!(!a.compare_password("wrong").unwrap());

        let mut anon = Principal::new_anonymous_from_device(fp("fp-A"), Utc::now());
        assert!(matches!(
            anon.set_password("nope"),
            Err(CoreError::ForbiddenRole { .. })
        ));
    }

    #[test]
    fn five_failures_in_window_lock_four_do_not() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let lock = Duration::minutes(30);

        let mut a = admin();
        for i in 0..4 {
            let locked = a
                .increment_login_attempts(5, window, lock, now + Duration::minutes(i))
                .unwrap();
            assert!(!locked, "attempt {} must not lock", i + 1);
        }
        assert!(!a.is_locked(now + Duration::minutes(5)));

        let locked = a
            .increment_login_attempts(5, window, lock, now + Duration::minutes(10))
            .unwrap();
        assert!(locked);
        assert!(a.is_locked(now + Duration::minutes(10)));
        // Lock expires after 30 minutes.
        assert!(!a.is_locked(now + Duration::minutes(41)));
    }

    #[test]
    fn stale_window_restarts_the_count() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let lock = Duration::minutes(30);

        let mut a = admin();
        for i in 0..4 {
            a.increment_login_attempts(5, window, lock, now + Duration::minutes(i))
                .unwrap();
        }
        // Fifth failure lands outside the window: counter restarts.
        let locked = a
            .increment_login_attempts(5, window, lock, now + Duration::minutes(20))
            .unwrap();
        assert!(!locked);
        assert_eq!(a.admin().unwrap().login_attempts, 1);
    }

    #[test]
    fn reset_clears_lock() {
        let now = Utc::now();
        let mut a = admin();
        for _ in 0..5 {
            a.increment_login_attempts(5, Duration::minutes(15), Duration::minutes(30), now)
                .unwrap();
        }
        assert!(a.is_locked(now));
        a.reset_login_attempts().unwrap();
        assert!(!a.is_locked(now));
    }

    #[test]
    fn password_reset_token_roundtrip() {
        let now = Utc::now();
        let mut a = admin();
        a.issue_password_reset_token("tok-1", Duration::minutes(30), now)
            .unwrap();

        // Wrong token, then expired token, then a clean consume.
        assert!(a.consume_password_reset_token("tok-2", now).is_err());
        assert!(a
            .consume_password_reset_token("tok-1", now + Duration::hours(1))
            .is_err());
        a.issue_password_reset_token("tok-3", Duration::minutes(30), now)
            .unwrap();
        a.consume_password_reset_token("tok-3", now + Duration::minutes(5))
            .unwrap();
        // Consumed tokens do not work twice.
        assert!(a
            .consume_password_reset_token("tok-3", now + Duration::minutes(6))
            .is_err());
    }

    #[test]
    fn security_event_log_is_capped() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        for i in 0..(SECURITY_EVENT_CAP + 10) {
            p.add_security_event(
                SecurityEvent {
                    event_type: format!("event_{i}"),
                    timestamp: now,
                    details: String::new(),
                    device_fingerprint: None,
                    severity: EventSeverity::Low,
                },
                Duration::hours(24),
                now,
            );
        }
        assert_eq!(p.security.security_events.len(), SECURITY_EVENT_CAP);
        // Newest first.
        assert_eq!(
            p.security.security_events[0].event_type,
            format!("event_{}", SECURITY_EVENT_CAP + 9)
        );
        assert!(!p.security.quarantine.active);
    }

    #[test]
    fn critical_event_auto_quarantines() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        p.add_security_event(
            SecurityEvent {
                event_type: "credential_stuffing".to_string(),
                timestamp: now,
                details: String::new(),
                device_fingerprint: None,
                severity: EventSeverity::Critical,
            },
            Duration::hours(24),
            now,
        );
        assert!(p.security.quarantine.active);
        assert_eq!(p.security.quarantine.until, Some(now + Duration::hours(24)));

        // Lazy expiry clears it.
        assert!(p.is_quarantined(now + Duration::hours(1)));
        assert!(!p.is_quarantined(now + Duration::hours(25)));
        assert!(!p.security.quarantine.active);
    }

    #[test]
    fn associations_capped_primary_survives() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-0"), now);
        // fp-0 is primary with the oldest last_used; 12 newer devices.
        for i in 1..=12 {
            p.add_device_association(
                fp(&format!("fp-{i}")),
                DeviceType::Mobile,
                RiskTier::Medium,
                false,
                now + Duration::minutes(i),
            );
        }
        assert_eq!(p.security.associated_devices.len(), ASSOCIATED_DEVICE_CAP);
        let primary = p.security.primary_device.clone().unwrap();
        assert!(
            p.security
                .associated_devices
                .iter()
                .any(|d| d.fingerprint_id == primary),
            "primary must appear in associated devices"
        );
    }

    #[test]
    fn upsert_updates_existing_association() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        let changed = p.add_device_association(
            fp("fp-A"),
            DeviceType::Desktop,
            RiskTier::Low,
            false,
            now + Duration::minutes(1),
        );
        assert!(!changed);
        assert_eq!(p.security.associated_devices.len(), 1);
        assert_eq!(p.security.associated_devices[0].trust_tier, RiskTier::Low);
    }

    #[test]
    fn permission_matrix_dispatches_on_role() {
        let a = admin();
        assert!(a.has_permission(Permission::Moderation));
        assert!(!a.has_permission(Permission::UserManagement));

        let super_admin = Principal::new_admin(
            "root",
            "root@example.com",
            10,
            vec![Permission::SuperAdmin],
            Utc::now(),
        );
        assert!(super_admin.has_permission(Permission::Moderation));
        assert!(super_admin.has_permission(Permission::SafeZones));

        let mut officer = Principal::new_officer("B-1234", "DMP", Utc::now());
        assert!(!officer.has_permission(Permission::SecurityMonitoring));
        if let RoleProfile::Officer(profile) = &mut officer.role_profile {
            profile.verification_status = VerificationStatus::Verified;
            profile.access_level = OfficerAccess::Standard;
        }
        assert!(officer.has_permission(Permission::SecurityMonitoring));
        assert!(!officer.has_permission(Permission::Moderation));

        let anon = Principal::new_anonymous_from_device(fp("fp-A"), Utc::now());
        assert!(!anon.has_permission(Permission::Analytics));
    }

    #[test]
    fn blended_trust_weights() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        // Pin activity/contribution at known values: fresh principal →
        // contribution neutral 50, activity has 1 session / 0 minutes.
        p.update_security_profile(100.0, now);
        let expected = 100.0 * 0.4 + p.activity_quality(now) * 0.3 + 50.0 * 0.3;
        assert!((p.security.overall_trust_score - expected).abs() < 1e-9);
    }

    #[test]
    fn activity_quality_sweet_spots() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        p.activity.first_seen = now - Duration::days(10);
        p.activity.total_sessions = 20; // 2/day
        p.activity.total_active_minutes = 200; // 10 min/session
        assert_eq!(p.activity_quality(now), 100.0);

        // One-second sessions score poorly.
        p.activity.total_active_minutes = 0;
        assert!(p.activity_quality(now) <= 50.0);
    }

    #[test]
    fn postsave_sweep_is_idempotent() {
        let now = Utc::now();
        let mut p = Principal::new_anonymous_from_device(fp("fp-A"), now);
        p.security.quarantine = QuarantineState {
            active: true,
            until: Some(now - Duration::minutes(1)),
            reason: None,
        };
        assert!(p.run_postsave_sweep(now));
        assert!(!p.run_postsave_sweep(now));
    }
}
