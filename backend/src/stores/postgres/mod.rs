//! PostgreSQL document stores.
//!
//! Entities persist as JSONB documents alongside extracted columns for
//! the indexed query paths. Queries use the runtime sqlx API so the
//! workspace builds without a live database.
//!
//! # Optimistic concurrency
//!
//! Every document carries a `revision`. Updates execute
//! `… WHERE id = $1 AND revision = $2`; zero rows affected means either
//! a stale write ([`CoreError::Conflict`]) or a missing document
//! ([`CoreError::NotFound`]), disambiguated with an existence probe.

mod device;
mod principal;
mod report;

pub use device::PostgresDeviceStore;
pub use principal::PostgresPrincipalStore;
pub use report::PostgresReportStore;

use civicwatch_core::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Map an sqlx error onto the core taxonomy.
pub(crate) fn db_err(error: &sqlx::Error) -> CoreError {
    match error {
        sqlx::Error::RowNotFound => CoreError::NotFound,
        other => CoreError::Database(other.to_string()),
    }
}

/// Serialize an entity for the JSONB `doc` column.
pub(crate) fn to_doc<T: Serialize>(entity: &T) -> Result<serde_json::Value> {
    serde_json::to_value(entity).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize an entity from the JSONB `doc` column.
pub(crate) fn from_doc<T: DeserializeOwned>(doc: serde_json::Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Run the bundled migrations.
///
/// # Errors
///
/// Returns [`CoreError::Database`] when migration fails.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CoreError::Database(format!("Migration failed: {e}")))
}
