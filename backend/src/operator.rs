//! Operator service: provisioning, credential checks, quarantine
//! toggles, security listings and statistics.
//!
//! Every mutating call emits an audit entry to the external audit
//! collaborator. Operator authentication itself happens upstream; this
//! module only implements the credential-verification primitive the
//! auth layer calls and the lockout policy around it.

use crate::environment::Environment;
use crate::providers::{
    AuditSink, CacheHealth, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore,
};
use chrono::Utc;
use civicwatch_core::device::{Device, QuarantineTrigger};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::events::AuditTarget;
use civicwatch_core::principal::{Permission, Principal, SecurityEvent};
use civicwatch_core::types::{EventSeverity, FingerprintId, PrincipalId};
use serde::{Deserialize, Serialize};

/// Aggregated security statistics for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatistics {
    /// Report counts per status.
    pub reports_by_status: Vec<(String, u64)>,
    /// Currently quarantined principals.
    pub quarantined_principals: usize,
    /// Devices matching the suspicion criteria.
    pub suspicious_devices: usize,
    /// Cache facade health.
    pub cache: CacheHealth,
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
    // Credentials
    // ═══════════════════════════════════════════════════════════════════

    /// Verify admin credentials, enforcing the lockout policy.
    ///
    /// The lock check runs before the password check, so a locked
    /// account answers locked even to the correct password. A failed
    /// attempt inside the window counts toward the lock; a success
    /// clears the counter.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unauthenticated`] on unknown username or wrong
    /// password; [`CoreError::AccountLocked`] while locked.
    pub async fn verify_admin_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal> {
        let now = Utc::now();
        let mut principal = self
            .principals
            .find_by_username(username)
            .await?
            .ok_or(CoreError::Unauthenticated)?;

        if principal.is_locked(now) {
            let until = principal
                .admin()
                .and_then(|admin| admin.lock_until)
                .unwrap_or(now);
            return Err(CoreError::AccountLocked { until });
        }

        if principal.compare_password(password)? {
            principal.reset_login_attempts()?;
            if let Some(profile) = principal.admin() {
                tracing::info!(username = %profile.username, "Admin login succeeded");
            }
            if let civicwatch_core::principal::RoleProfile::Admin(admin) =
                &mut principal.role_profile
            {
                admin.last_login = Some(now);
            }
            return self.principals.update(&principal).await;
        }

        let locked = principal.increment_login_attempts(
            self.config.gate.login_max_attempts,
            self.config.gate.login_attempt_window,
            self.config.gate.login_lock_duration,
            now,
        )?;
        if locked {
            principal.add_security_event(
                SecurityEvent {
                    event_type: "account_locked".to_string(),
                    timestamp: now,
                    details: "Repeated failed logins".to_string(),
                    device_fingerprint: None,
                    severity: EventSeverity::High,
                },
                self.config.quarantine.default_duration,
                now,
            );
        }
        self.principals.update(&principal).await?;
        Err(CoreError::Unauthenticated)
    }

    /// Explicit unlock of a locked admin account.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without user management;
    /// [`CoreError::NotFound`] for unknown usernames.
    pub async fn unlock_admin(&self, actor: &Principal, username: &str) -> Result<Principal> {
        self.require_permission(actor, Permission::UserManagement)?;
        let mut principal = self
            .principals
            .find_by_username(username)
            .await?
            .ok_or(CoreError::NotFound)?;
        principal.reset_login_attempts()?;
        let principal = self.principals.update(&principal).await?;

        self.record_audit(
            actor,
            "admin_unlock",
            AuditTarget::Principal(principal.id.clone()),
            serde_json::json!({ "username": username }),
            EventSeverity::Medium,
        )
        .await;
        Ok(principal)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════

    /// Provision an admin principal with an initial password.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without user management; store
    /// errors (including duplicate usernames).
    pub async fn provision_admin(
        &self,
        actor: &Principal,
        username: &str,
        email: &str,
        admin_level: u8,
        permissions: Vec<Permission>,
        password: &str,
    ) -> Result<Principal> {
        self.require_permission(actor, Permission::UserManagement)?;
        let now = Utc::now();
        let mut principal = Principal::new_admin(username, email, admin_level, permissions, now);
        principal.set_password(password)?;
        let principal = self.principals.insert(&principal).await?;

        self.record_audit(
            actor,
            "principal_provisioned",
            AuditTarget::Principal(principal.id.clone()),
            serde_json::json!({ "role": "admin", "username": username }),
            EventSeverity::Medium,
        )
        .await;
        Ok(principal)
    }

    /// Provision an officer principal (verification pending).
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without user management; store
    /// errors.
    pub async fn provision_officer(
        &self,
        actor: &Principal,
        badge_number: &str,
        department: &str,
    ) -> Result<Principal> {
        self.require_permission(actor, Permission::UserManagement)?;
        let principal = self
            .principals
            .insert(&Principal::new_officer(badge_number, department, Utc::now()))
            .await?;

        self.record_audit(
            actor,
            "principal_provisioned",
            AuditTarget::Principal(principal.id.clone()),
            serde_json::json!({ "role": "officer", "badge": badge_number }),
            EventSeverity::Medium,
        )
        .await;
        Ok(principal)
    }

    /// Provision a researcher principal (approval pending).
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without user management; store
    /// errors.
    pub async fn provision_researcher(
        &self,
        actor: &Principal,
        institution: &str,
        proposal: &str,
    ) -> Result<Principal> {
        self.require_permission(actor, Permission::UserManagement)?;
        let principal = self
            .principals
            .insert(&Principal::new_researcher(institution, proposal, Utc::now()))
            .await?;

        self.record_audit(
            actor,
            "principal_provisioned",
            AuditTarget::Principal(principal.id.clone()),
            serde_json::json!({ "role": "researcher", "institution": institution }),
            EventSeverity::Medium,
        )
        .await;
        Ok(principal)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Quarantine Toggles
    // ═══════════════════════════════════════════════════════════════════

    /// Quarantine or release a principal.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without security monitoring;
    /// [`CoreError::NotFound`]; store errors.
    pub async fn set_principal_quarantine(
        &self,
        actor: &Principal,
        principal_id: &PrincipalId,
        quarantine: bool,
        reason: Option<String>,
    ) -> Result<Principal> {
        self.require_permission(actor, Permission::SecurityMonitoring)?;
        let now = Utc::now();
        let mut principal = self.principals.get(principal_id).await?;

        if quarantine {
            principal.security.quarantine = civicwatch_core::device::QuarantineState {
                active: true,
                until: Some(now + self.config.quarantine.default_duration),
                reason: reason.clone(),
            };
        } else {
            principal.security.quarantine = Default::default();
        }
        let principal = self.principals.update(&principal).await?;

        self.record_audit(
            actor,
            if quarantine {
                "principal_quarantined"
            } else {
                "principal_released"
            },
            AuditTarget::Principal(principal.id.clone()),
            serde_json::json!({ "reason": reason }),
            EventSeverity::High,
        )
        .await;
        Ok(principal)
    }

    /// Quarantine or release a single device.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without security monitoring;
    /// [`CoreError::NotFound`]; store errors.
    pub async fn set_device_quarantine(
        &self,
        actor: &Principal,
        fingerprint: &FingerprintId,
        quarantine: bool,
        reason: Option<String>,
    ) -> Result<Device> {
        self.require_permission(actor, Permission::SecurityMonitoring)?;
        let now = Utc::now();
        let duration = self.config.quarantine.default_duration;
        let moderator = actor.id.to_string();
        let reason_applied = reason
            .clone()
            .unwrap_or_else(|| "Moderator decision".to_string());

        let (device, _) = self
            .update_device_with(fingerprint, move |device| {
                if quarantine {
                    device.schedule_quarantine_review(
                        reason_applied.clone(),
                        duration,
                        QuarantineTrigger::Moderator,
                        now,
                    );
                } else {
                    device.release_quarantine(moderator.clone(), now);
                }
            })
            .await?;

        self.record_audit(
            actor,
            if quarantine {
                "device_quarantined"
            } else {
                "device_released"
            },
            AuditTarget::Device(fingerprint.clone()),
            serde_json::json!({ "reason": reason }),
            EventSeverity::High,
        )
        .await;
        Ok(device)
    }

    /// Bulk quarantine toggle. Returns the fingerprints that failed.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without security monitoring.
    pub async fn bulk_device_quarantine(
        &self,
        actor: &Principal,
        fingerprints: &[FingerprintId],
        quarantine: bool,
        reason: Option<String>,
    ) -> Result<Vec<FingerprintId>> {
        self.require_permission(actor, Permission::SecurityMonitoring)?;
        let mut failed = Vec::new();
        for fingerprint in fingerprints {
            let result = self
                .set_device_quarantine(actor, fingerprint, quarantine, reason.clone())
                .await;
            if let Err(error) = result {
                tracing::warn!(%fingerprint, error = %error, "Bulk quarantine entry failed");
                failed.push(fingerprint.clone());
            }
        }
        Ok(failed)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Listings & Statistics
    // ═══════════════════════════════════════════════════════════════════

    /// Suspicious-device listing for the dashboard.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without security monitoring; store
    /// errors.
    pub async fn list_suspicious_devices(
        &self,
        actor: &Principal,
        limit: usize,
    ) -> Result<Vec<Device>> {
        self.require_permission(actor, Permission::SecurityMonitoring)?;
        self.devices.find_suspicious(limit).await
    }

    /// Aggregate security statistics.
    ///
    /// # Errors
    ///
    /// [`CoreError::ForbiddenRole`] without analytics; store errors.
    pub async fn security_statistics(&self, actor: &Principal) -> Result<SecurityStatistics> {
        self.require_permission(actor, Permission::Analytics)?;

        let reports_by_status: Vec<(String, u64)> = self
            .reports
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();
        let quarantined_principals = self.principals.list_quarantined().await?.len();
        let suspicious_devices = self.devices.find_suspicious(1_000).await?.len();

        Ok(SecurityStatistics {
            reports_by_status,
            quarantined_principals,
            suspicious_devices,
            cache: self.cache.health_check().await,
        })
    }

    /// Sweep quarantined principals, clearing lapsed deadlines.
    ///
    /// Returns the number of principals healed. Runs from the periodic
    /// reaper alongside the coordinated-attack sweep.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn reap_expired_quarantines(&self) -> Result<usize> {
        let now = Utc::now();
        let mut healed = 0;
        for mut principal in self.principals.list_quarantined().await? {
            if principal.run_postsave_sweep(now) {
                match self.principals.update(&principal).await {
                    Ok(_) => healed += 1,
                    Err(error) => {
                        tracing::warn!(
                            principal_id = %principal.id,
                            error = %error,
                            "Quarantine reap write failed"
                        );
                    }
                }
            }
        }
        if healed > 0 {
            tracing::info!(healed, "Expired principal quarantines cleared");
        }
        Ok(healed)
    }

    fn require_permission(&self, actor: &Principal, permission: Permission) -> Result<()> {
        if actor.has_permission(permission) {
            Ok(())
        } else {
            Err(CoreError::ForbiddenRole {
                required: format!("{permission:?}"),
            })
        }
    }
}
