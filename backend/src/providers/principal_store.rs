//! Principal document-store trait.

use civicwatch_core::error::Result;
use civicwatch_core::principal::Principal;
use civicwatch_core::types::{FingerprintId, PrincipalId};
use std::future::Future;

/// Principal document store.
///
/// Principals are never hard-deleted; disablement is modeled on the
/// entity (permanent ban + quarantine).
///
/// # Optimistic concurrency
///
/// `update` compares the entity's `revision` against the stored one and
/// returns [`civicwatch_core::CoreError::Conflict`] on a stale write;
/// the returned entity carries the bumped revision.
pub trait PrincipalStore: Send + Sync {
    /// Get a principal by id.
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::NotFound`] when absent; store
    /// errors otherwise.
    fn get(&self, id: &PrincipalId) -> impl Future<Output = Result<Principal>> + Send;

    /// Find the principal linked to a device fingerprint.
    ///
    /// # Errors
    ///
    /// Returns store errors; an unlinked fingerprint is `Ok(None)`.
    fn find_by_device(
        &self,
        fingerprint: &FingerprintId,
    ) -> impl Future<Output = Result<Option<Principal>>> + Send;

    /// Find an admin principal by username.
    ///
    /// # Errors
    ///
    /// Returns store errors; an unknown username is `Ok(None)`.
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<Principal>>> + Send;

    /// Insert a new principal.
    ///
    /// # Errors
    ///
    /// Store errors, including id collisions.
    fn insert(&self, principal: &Principal) -> impl Future<Output = Result<Principal>> + Send;

    /// Update an existing principal (optimistic, see trait docs).
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::Conflict`] on a stale revision,
    /// [`civicwatch_core::CoreError::NotFound`] when absent.
    fn update(&self, principal: &Principal) -> impl Future<Output = Result<Principal>> + Send;

    /// List currently quarantined principals (for the expiry reaper and
    /// operator dashboards).
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn list_quarantined(&self) -> impl Future<Output = Result<Vec<Principal>>> + Send;
}
