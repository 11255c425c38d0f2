//! Mock principal store for testing.

use crate::providers::PrincipalStore;
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::principal::{Principal, RoleProfile};
use civicwatch_core::types::{FingerprintId, PrincipalId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock principal store over process memory.
///
/// Mirrors the optimistic-concurrency contract of the real store:
/// `update` rejects stale revisions with [`CoreError::Conflict`].
#[derive(Debug, Clone, Default)]
pub struct MockPrincipalStore {
    principals: Arc<Mutex<HashMap<PrincipalId, Principal>>>,
}

impl MockPrincipalStore {
    /// Create an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored principals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<PrincipalId, Principal>> {
        match self.principals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PrincipalStore for MockPrincipalStore {
    async fn get(&self, id: &PrincipalId) -> Result<Principal> {
        self.guard().get(id).cloned().ok_or(CoreError::NotFound)
    }

    async fn find_by_device(&self, fingerprint: &FingerprintId) -> Result<Option<Principal>> {
        Ok(self
            .guard()
            .values()
            .find(|p| {
                p.security.primary_device.as_ref() == Some(fingerprint)
                    || p.security
                        .associated_devices
                        .iter()
                        .any(|d| &d.fingerprint_id == fingerprint)
            })
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        Ok(self
            .guard()
            .values()
            .find(|p| match &p.role_profile {
                RoleProfile::Admin(admin) => admin.username == username,
                _ => false,
            })
            .cloned())
    }

    async fn insert(&self, principal: &Principal) -> Result<Principal> {
        if principal.ephemeral {
            return Err(CoreError::Internal(
                "attempted to persist an ephemeral principal".to_string(),
            ));
        }
        let mut guard = self.guard();
        if guard.contains_key(&principal.id) {
            return Err(CoreError::Database("principal id already exists".to_string()));
        }
        guard.insert(principal.id.clone(), principal.clone());
        Ok(principal.clone())
    }

    async fn update(&self, principal: &Principal) -> Result<Principal> {
        let mut guard = self.guard();
        let Some(stored) = guard.get_mut(&principal.id) else {
            return Err(CoreError::NotFound);
        };
        if stored.revision != principal.revision {
            return Err(CoreError::Conflict {
                entity: "principal",
            });
        }
        let mut updated = principal.clone();
        updated.revision += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_quarantined(&self) -> Result<Vec<Principal>> {
        Ok(self
            .guard()
            .values()
            .filter(|p| p.security.quarantine.active)
            .cloned()
            .collect())
    }
}
