//! PostgreSQL principal store.

use super::{db_err, from_doc, to_doc};
use crate::providers::PrincipalStore;
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::principal::{Principal, RoleProfile};
use civicwatch_core::types::{FingerprintId, PrincipalId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// PostgreSQL principal store.
#[derive(Clone)]
pub struct PostgresPrincipalStore {
    /// Connection pool.
    pool: PgPool,
}

const SELECT_DOC: &str = "SELECT doc FROM principals";

impl PostgresPrincipalStore {
    /// Create a principal store over a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &PgRow) -> Result<Principal> {
        let doc: serde_json::Value = row
            .try_get("doc")
            .map_err(|e| CoreError::Database(format!("Failed to read principal doc: {e}")))?;
        from_doc(doc)
    }

    fn username_of(principal: &Principal) -> Option<&str> {
        match &principal.role_profile {
            RoleProfile::Admin(admin) => Some(admin.username.as_str()),
            _ => None,
        }
    }

    async fn exists(&self, id: &PrincipalId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM principals WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        Ok(row.is_some())
    }
}

impl PrincipalStore for PostgresPrincipalStore {
    async fn get(&self, id: &PrincipalId) -> Result<Principal> {
        let row = sqlx::query(&format!("{SELECT_DOC} WHERE id = $1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?
            .ok_or(CoreError::NotFound)?;
        Self::decode(&row)
    }

    async fn find_by_device(&self, fingerprint: &FingerprintId) -> Result<Option<Principal>> {
        // Either the primary device or any associated device matches.
        let row = sqlx::query(&format!(
            "{SELECT_DOC}
             WHERE primary_device = $1
                OR doc->'security'->'associated_devices' @>
                   jsonb_build_array(jsonb_build_object('fingerprint_id', $1::text))
             LIMIT 1"
        ))
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let row = sqlx::query(&format!("{SELECT_DOC} WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert(&self, principal: &Principal) -> Result<Principal> {
        // Ephemeral principals must be promoted, never persisted.
        if principal.ephemeral {
            return Err(CoreError::Internal(
                "attempted to persist an ephemeral principal".to_string(),
            ));
        }
        let doc = to_doc(principal)?;
        sqlx::query(
            r"
            INSERT INTO principals
                (id, role, risk_tier, last_seen, quarantined, username,
                 primary_device, revision, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&principal.id.0)
        .bind(principal.role().as_str())
        .bind(principal.security.risk_tier.as_str())
        .bind(principal.activity.last_seen)
        .bind(principal.security.quarantine.active)
        .bind(Self::username_of(principal))
        .bind(
            principal
                .security
                .primary_device
                .as_ref()
                .map(FingerprintId::as_str),
        )
        .bind(i64::try_from(principal.revision).unwrap_or(0))
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        Ok(principal.clone())
    }

    async fn update(&self, principal: &Principal) -> Result<Principal> {
        let mut updated = principal.clone();
        updated.revision += 1;
        let doc = to_doc(&updated)?;

        let result = sqlx::query(
            r"
            UPDATE principals SET
                revision = revision + 1,
                role = $3, risk_tier = $4, last_seen = $5, quarantined = $6,
                username = $7, primary_device = $8, doc = $9
            WHERE id = $1 AND revision = $2
            ",
        )
        .bind(&principal.id.0)
        .bind(i64::try_from(principal.revision).unwrap_or(0))
        .bind(updated.role().as_str())
        .bind(updated.security.risk_tier.as_str())
        .bind(updated.activity.last_seen)
        .bind(updated.security.quarantine.active)
        .bind(Self::username_of(&updated))
        .bind(
            updated
                .security
                .primary_device
                .as_ref()
                .map(FingerprintId::as_str),
        )
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        if result.rows_affected() == 0 {
            return if self.exists(&principal.id).await? {
                Err(CoreError::Conflict {
                    entity: "principal",
                })
            } else {
                Err(CoreError::NotFound)
            };
        }
        Ok(updated)
    }

    async fn list_quarantined(&self) -> Result<Vec<Principal>> {
        let rows = sqlx::query(&format!("{SELECT_DOC} WHERE quarantined"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        rows.iter().map(Self::decode).collect()
    }
}
