//! Mock device store for testing.

use crate::providers::DeviceStore;
use chrono::{DateTime, Utc};
use civicwatch_core::device::Device;
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::geo::{self, GeoPoint};
use civicwatch_core::types::{FingerprintId, RiskTier};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock device store over process memory.
///
/// Mirrors the optimistic-concurrency contract of the real store and
/// the bounded query surface the detector relies on.
#[derive(Debug, Clone, Default)]
pub struct MockDeviceStore {
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl MockDeviceStore {
    /// Create an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Device>> {
        match self.devices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn sorted_by_last_seen(mut devices: Vec<Device>) -> Vec<Device> {
        devices.sort_by(|a, b| b.activity.last_seen.cmp(&a.activity.last_seen));
        devices
    }
}

impl DeviceStore for MockDeviceStore {
    async fn get(&self, fingerprint: &FingerprintId) -> Result<Device> {
        self.guard()
            .get(fingerprint.as_str())
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    async fn find(&self, fingerprint: &FingerprintId) -> Result<Option<Device>> {
        Ok(self.guard().get(fingerprint.as_str()).cloned())
    }

    async fn insert(&self, device: &Device) -> Result<Device> {
        let mut guard = self.guard();
        let key = device.fingerprint_id.as_str().to_string();
        if guard.contains_key(&key) {
            return Err(CoreError::Database("fingerprint already exists".to_string()));
        }
        guard.insert(key, device.clone());
        Ok(device.clone())
    }

    async fn update(&self, device: &Device) -> Result<Device> {
        let mut guard = self.guard();
        let Some(stored) = guard.get_mut(device.fingerprint_id.as_str()) else {
            return Err(CoreError::NotFound);
        };
        if stored.revision != device.revision {
            return Err(CoreError::Conflict { entity: "device" });
        }
        let mut updated = device.clone();
        updated.revision += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn active_since(
        &self,
        since: DateTime<Utc>,
        min_submissions: u32,
    ) -> Result<Vec<Device>> {
        Ok(Self::sorted_by_last_seen(
            self.guard()
                .values()
                .filter(|d| {
                    d.activity.last_seen >= since
                        && d.security.total_reports_submitted > min_submissions
                })
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_ip_hash(&self, ip_hash: &str, limit: usize) -> Result<Vec<Device>> {
        let mut devices = Self::sorted_by_last_seen(
            self.guard()
                .values()
                .filter(|d| d.network.ip_hash.as_deref() == Some(ip_hash))
                .cloned()
                .collect(),
        );
        devices.truncate(limit);
        Ok(devices)
    }

    async fn find_by_signature(
        &self,
        user_agent_hash: Option<&str>,
        screen_resolution: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Device>> {
        let mut devices = Self::sorted_by_last_seen(
            self.guard()
                .values()
                .filter(|d| {
                    (user_agent_hash.is_some()
                        && d.signature.user_agent_hash.as_deref() == user_agent_hash)
                        || (screen_resolution.is_some()
                            && d.signature.screen_resolution.as_deref() == screen_resolution)
                })
                .cloned()
                .collect(),
        );
        devices.truncate(limit);
        Ok(devices)
    }

    async fn find_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<Device>> {
        let mut devices = Self::sorted_by_last_seen(
            self.guard()
                .values()
                .filter(|d| {
                    d.location
                        .last_known
                        .as_ref()
                        .is_some_and(|fix| geo::haversine_meters(fix.point, point) <= radius_m)
                })
                .cloned()
                .collect(),
        );
        devices.truncate(limit);
        Ok(devices)
    }

    async fn find_by_behavior(
        &self,
        min_score: f64,
        max_score: f64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Device>> {
        let mut devices = Self::sorted_by_last_seen(
            self.guard()
                .values()
                .filter(|d| {
                    (min_score..=max_score).contains(&d.behavior.human_behavior_score)
                        && d.activity.last_seen >= since
                })
                .cloned()
                .collect(),
        );
        devices.truncate(limit);
        Ok(devices)
    }

    async fn find_suspicious(&self, limit: usize) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .guard()
            .values()
            .filter(|d| {
                matches!(d.security.risk_tier, RiskTier::High | RiskTier::Critical)
                    || d.threat.threat_confidence > 70.0
                    || d.region.cross_border_suspicion > 70.0
                    || d.security.spam_reports > 3
                    || d.anomaly.score > 70.0
                    || d.security.shadow_banned
            })
            .cloned()
            .collect();
        devices.sort_by(|a, b| {
            b.threat
                .threat_confidence
                .partial_cmp(&a.threat.threat_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        devices.truncate(limit);
        Ok(devices)
    }

    async fn bulk_update_trust(&self, updates: &[(FingerprintId, f64)]) -> Result<u64> {
        let mut guard = self.guard();
        let mut written = 0;
        for (fingerprint, trust) in updates {
            if let Some(device) = guard.get_mut(fingerprint.as_str()) {
                device.security.trust_score = *trust;
                device.revision += 1;
                written += 1;
            }
        }
        Ok(written)
    }
}
