//! Device document-store trait.

use chrono::{DateTime, Utc};
use civicwatch_core::device::Device;
use civicwatch_core::error::Result;
use civicwatch_core::geo::GeoPoint;
use civicwatch_core::types::FingerprintId;
use std::future::Future;

/// Device document store.
///
/// Devices are permanent (the abuse-control audit trail) and contended:
/// `update` is optimistic on the `revision` field and callers retry on
/// [`civicwatch_core::CoreError::Conflict`] up to three times.
///
/// The bounded query surface exists for the coordinated-attack detector
/// and cross-device correlation; every listing takes a `limit`.
pub trait DeviceStore: Send + Sync {
    /// Get a device by fingerprint.
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::NotFound`] when absent.
    fn get(&self, fingerprint: &FingerprintId) -> impl Future<Output = Result<Device>> + Send;

    /// Find a device by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns store errors; an unknown fingerprint is `Ok(None)`.
    fn find(
        &self,
        fingerprint: &FingerprintId,
    ) -> impl Future<Output = Result<Option<Device>>> + Send;

    /// Insert a new device.
    ///
    /// # Errors
    ///
    /// Store errors, including fingerprint collisions.
    fn insert(&self, device: &Device) -> impl Future<Output = Result<Device>> + Send;

    /// Update an existing device (optimistic, see trait docs).
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::Conflict`] on a stale revision,
    /// [`civicwatch_core::CoreError::NotFound`] when absent.
    fn update(&self, device: &Device) -> impl Future<Output = Result<Device>> + Send;

    /// Devices seen since `since` with more than `min_submissions`
    /// submitted reports, the detector's sweep window.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn active_since(
        &self,
        since: DateTime<Utc>,
        min_submissions: u32,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Devices sharing an IP hash, most recently seen first.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn find_by_ip_hash(
        &self,
        ip_hash: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Devices sharing a user-agent hash or screen resolution.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn find_by_signature(
        &self,
        user_agent_hash: Option<&str>,
        screen_resolution: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Devices whose last known fix is within `radius_m` of `point`.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn find_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Devices with a human-behavior score inside `[min, max]` active
    /// since `since`.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn find_by_behavior(
        &self,
        min_score: f64,
        max_score: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Suspicious-device listing for operator dashboards: high/critical
    /// risk, threat > 70, cross-border > 70, spam > 3, anomaly > 70 or
    /// shadow-banned; sorted by threat confidence descending.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn find_suspicious(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Bulk trust-score update from batch re-scoring. Returns the number
    /// of devices written.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn bulk_update_trust(
        &self,
        updates: &[(FingerprintId, f64)],
    ) -> impl Future<Output = Result<u64>> + Send;
}
