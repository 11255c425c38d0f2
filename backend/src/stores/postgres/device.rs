//! PostgreSQL device store.

use super::{db_err, from_doc, to_doc};
use crate::providers::DeviceStore;
use chrono::{DateTime, Utc};
use civicwatch_core::device::Device;
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::geo::{self, GeoPoint};
use civicwatch_core::types::FingerprintId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// PostgreSQL device store.
#[derive(Clone)]
pub struct PostgresDeviceStore {
    /// Connection pool.
    pool: PgPool,
}

const SELECT_DOC: &str = "SELECT doc FROM devices";

impl PostgresDeviceStore {
    /// Create a device store over a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &PgRow) -> Result<Device> {
        let doc: serde_json::Value = row
            .try_get("doc")
            .map_err(|e| CoreError::Database(format!("Failed to read device doc: {e}")))?;
        from_doc(doc)
    }

    fn decode_all(rows: Vec<PgRow>) -> Result<Vec<Device>> {
        rows.iter().map(Self::decode).collect()
    }

    async fn exists(&self, fingerprint: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM devices WHERE fingerprint_id = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        Ok(row.is_some())
    }
}

/// Bind arguments shared by insert and update: the extracted columns
/// the indexes cover, all derived from the entity.
macro_rules! bind_extracted {
    ($query:expr, $device:expr, $doc:expr) => {
        $query
            .bind($device.principal_id.as_ref().map(ToString::to_string))
            .bind($device.security.risk_tier.as_str())
            .bind($device.activity.last_seen)
            .bind($device.network.ip_hash.as_deref())
            .bind($device.anomaly.score)
            .bind($device.security.trust_score)
            .bind($device.threat.threat_confidence)
            .bind($device.region.cross_border_suspicion)
            .bind($device.behavior.human_behavior_score)
            .bind(i64::from($device.security.total_reports_submitted))
            .bind(i64::from($device.security.spam_reports))
            .bind($device.security.shadow_banned)
            .bind($device.signature.user_agent_hash.as_deref())
            .bind($device.signature.screen_resolution.as_deref())
            .bind($device.location.last_known.as_ref().map(|fix| fix.point.lng))
            .bind($device.location.last_known.as_ref().map(|fix| fix.point.lat))
            .bind($device.processing.next_scheduled_analysis)
            .bind($doc)
    };
}

impl DeviceStore for PostgresDeviceStore {
    async fn get(&self, fingerprint: &FingerprintId) -> Result<Device> {
        self.find(fingerprint).await?.ok_or(CoreError::NotFound)
    }

    async fn find(&self, fingerprint: &FingerprintId) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{SELECT_DOC} WHERE fingerprint_id = $1"))
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert(&self, device: &Device) -> Result<Device> {
        let doc = to_doc(device)?;
        let query = sqlx::query(
            r"
            INSERT INTO devices
                (fingerprint_id, revision,
                 principal_id, risk_tier, last_seen, ip_hash, anomaly_score,
                 trust_score, threat_confidence, cross_border_suspicion,
                 human_behavior_score, total_reports, spam_reports,
                 shadow_banned, user_agent_hash, screen_resolution,
                 last_lng, last_lat, next_scheduled_analysis, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20)
            ",
        )
        .bind(device.fingerprint_id.as_str())
        .bind(i64::try_from(device.revision).unwrap_or(0));
        bind_extracted!(query, device, doc)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

        Ok(device.clone())
    }

    async fn update(&self, device: &Device) -> Result<Device> {
        let mut updated = device.clone();
        updated.revision += 1;
        let doc = to_doc(&updated)?;

        let query = sqlx::query(
            r"
            UPDATE devices SET
                revision = revision + 1,
                principal_id = $3, risk_tier = $4, last_seen = $5,
                ip_hash = $6, anomaly_score = $7, trust_score = $8,
                threat_confidence = $9, cross_border_suspicion = $10,
                human_behavior_score = $11, total_reports = $12,
                spam_reports = $13, shadow_banned = $14,
                user_agent_hash = $15, screen_resolution = $16,
                last_lng = $17, last_lat = $18,
                next_scheduled_analysis = $19, doc = $20
            WHERE fingerprint_id = $1 AND revision = $2
            ",
        )
        .bind(device.fingerprint_id.as_str())
        .bind(i64::try_from(device.revision).unwrap_or(0));
        let result = bind_extracted!(query, updated, doc)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

        if result.rows_affected() == 0 {
            return if self.exists(device.fingerprint_id.as_str()).await? {
                Err(CoreError::Conflict { entity: "device" })
            } else {
                Err(CoreError::NotFound)
            };
        }
        Ok(updated)
    }

    async fn active_since(
        &self,
        since: DateTime<Utc>,
        min_submissions: u32,
    ) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DOC} WHERE last_seen >= $1 AND total_reports > $2 ORDER BY last_seen DESC"
        ))
        .bind(since)
        .bind(i64::from(min_submissions))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        Self::decode_all(rows)
    }

    async fn find_by_ip_hash(&self, ip_hash: &str, limit: usize) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DOC} WHERE ip_hash = $1 ORDER BY last_seen DESC LIMIT $2"
        ))
        .bind(ip_hash)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        Self::decode_all(rows)
    }

    async fn find_by_signature(
        &self,
        user_agent_hash: Option<&str>,
        screen_resolution: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DOC}
             WHERE (user_agent_hash = $1 AND $1 IS NOT NULL)
                OR (screen_resolution = $2 AND $2 IS NOT NULL)
             ORDER BY last_seen DESC LIMIT $3"
        ))
        .bind(user_agent_hash)
        .bind(screen_resolution)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        Self::decode_all(rows)
    }

    async fn find_near(
        &self,
        point: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<Device>> {
        // Bounding-box prefilter over the indexed columns, exact
        // great-circle distance applied afterwards.
        let lat_delta = radius_m / 111_320.0;
        let lng_delta = radius_m / (111_320.0 * point.lat.to_radians().cos().abs().max(0.01));

        let rows = sqlx::query(&format!(
            "{SELECT_DOC}
             WHERE last_lat BETWEEN $1 AND $2
               AND last_lng BETWEEN $3 AND $4
             ORDER BY last_seen DESC LIMIT $5"
        ))
        .bind(point.lat - lat_delta)
        .bind(point.lat + lat_delta)
        .bind(point.lng - lng_delta)
        .bind(point.lng + lng_delta)
        .bind(i64::try_from(limit.saturating_mul(4)).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        let mut devices = Self::decode_all(rows)?;
        devices.retain(|device| {
            device
                .location
                .last_known
                .as_ref()
                .is_some_and(|fix| geo::haversine_meters(fix.point, point) <= radius_m)
        });
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
        let rows = sqlx::query(&format!(
            "{SELECT_DOC}
             WHERE human_behavior_score BETWEEN $1 AND $2
               AND last_seen >= $3
             ORDER BY last_seen DESC LIMIT $4"
        ))
        .bind(min_score)
        .bind(max_score)
        .bind(since)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        Self::decode_all(rows)
    }

    async fn find_suspicious(&self, limit: usize) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DOC}
             WHERE risk_tier IN ('high', 'critical')
                OR threat_confidence > 70
                OR cross_border_suspicion > 70
                OR spam_reports > 3
                OR anomaly_score > 70
                OR shadow_banned
             ORDER BY threat_confidence DESC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        Self::decode_all(rows)
    }

    async fn bulk_update_trust(&self, updates: &[(FingerprintId, f64)]) -> Result<u64> {
        // One round trip: unnest the pairs and join.
        let ids: Vec<String> = updates
            .iter()
            .map(|(id, _)| id.as_str().to_string())
            .collect();
        let scores: Vec<f64> = updates.iter().map(|(_, score)| *score).collect();

        let result = sqlx::query(
            r"
            UPDATE devices AS d SET
                trust_score = u.score,
                doc = jsonb_set(d.doc, '{security,trust_score}', to_jsonb(u.score)),
                revision = d.revision + 1
            FROM (SELECT unnest($1::text[]) AS id, unnest($2::float8[]) AS score) AS u
            WHERE d.fingerprint_id = u.id
            ",
        )
        .bind(&ids)
        .bind(&scores)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        Ok(result.rows_affected())
    }
}
