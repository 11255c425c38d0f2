//! PostgreSQL report store.

use super::{db_err, from_doc, to_doc};
use crate::providers::{ReportQuery, ReportStore, SortOrder};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::report::{Report, ReportStatus};
use civicwatch_core::types::ReportId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// PostgreSQL report store.
#[derive(Clone)]
pub struct PostgresReportStore {
    /// Connection pool.
    pool: PgPool,
}

impl PostgresReportStore {
    /// Create a report store over a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &PgRow) -> Result<Report> {
        let doc: serde_json::Value = row
            .try_get("doc")
            .map_err(|e| CoreError::Database(format!("Failed to read report doc: {e}")))?;
        from_doc(doc)
    }

    async fn exists(&self, id: ReportId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM reports WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        Ok(row.is_some())
    }
}

impl ReportStore for PostgresReportStore {
    async fn get(&self, id: ReportId) -> Result<Report> {
        let row = sqlx::query("SELECT doc FROM reports WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?
            .ok_or(CoreError::NotFound)?;
        Self::decode(&row)
    }

    async fn insert(&self, report: &Report) -> Result<Report> {
        let doc = to_doc(report)?;
        sqlx::query(
            r"
            INSERT INTO reports
                (id, status, priority, submitted_at, incident_type, severity,
                 female_sensitive, job_id, queue_name, lng, lat, revision, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(report.id.0)
        .bind(report.status.as_str())
        .bind(i16::from(report.moderation.priority_level))
        .bind(report.timestamp)
        .bind(&report.incident_type)
        .bind(i16::from(report.severity.get()))
        .bind(report.security_flags.requires_female_validation)
        .bind(report.processing.distributed.job_id.as_deref())
        .bind(&report.processing.distributed.queue_name)
        .bind(report.location.original_point.lng)
        .bind(report.location.original_point.lat)
        .bind(i64::try_from(report.revision).unwrap_or(0))
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        Ok(report.clone())
    }

    async fn update(&self, report: &Report) -> Result<Report> {
        let mut updated = report.clone();
        updated.revision += 1;
        let doc = to_doc(&updated)?;

        let result = sqlx::query(
            r"
            UPDATE reports SET
                revision = revision + 1,
                status = $3, priority = $4, job_id = $5, queue_name = $6,
                doc = $7
            WHERE id = $1 AND revision = $2
            ",
        )
        .bind(report.id.0)
        .bind(i64::try_from(report.revision).unwrap_or(0))
        .bind(updated.status.as_str())
        .bind(i16::from(updated.moderation.priority_level))
        .bind(updated.processing.distributed.job_id.as_deref())
        .bind(&updated.processing.distributed.queue_name)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(&e))?;

        if result.rows_affected() == 0 {
            return if self.exists(report.id).await? {
                Err(CoreError::Conflict { entity: "report" })
            } else {
                Err(CoreError::NotFound)
            };
        }
        Ok(updated)
    }

    async fn list(&self, query: &ReportQuery) -> Result<Vec<Report>> {
        let mut sql = String::from("SELECT doc FROM reports WHERE 1=1");
        if !query.statuses.is_empty() {
            let statuses: Vec<String> = query
                .statuses
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            sql.push_str(&format!(" AND status IN ({})", statuses.join(", ")));
        }
        if query.incident_type.is_some() {
            sql.push_str(" AND incident_type = $1");
        }
        if let Some(min) = query.min_severity {
            sql.push_str(&format!(" AND severity >= {}", i16::from(min)));
        }
        if let Some(sensitive) = query.gender_sensitive {
            sql.push_str(if sensitive {
                " AND female_sensitive"
            } else {
                " AND NOT female_sensitive"
            });
        }

        let column = match query.sort_by.as_deref() {
            Some("severity") => "severity",
            Some("priority") => "priority",
            _ => "submitted_at",
        };
        let direction = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {direction}"));

        let limit = if query.limit == 0 { 100 } else { query.limit };
        sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));

        let mut prepared = sqlx::query(&sql);
        if let Some(incident_type) = &query.incident_type {
            prepared = prepared.bind(incident_type);
        }

        let rows = prepared
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;
        rows.iter().map(Self::decode).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(ReportStatus, u64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM reports GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| CoreError::Database(e.to_string()))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| CoreError::Database(e.to_string()))?;
            counts.push((
                ReportStatus::from_str(&status)?,
                u64::try_from(total).unwrap_or(0),
            ));
        }
        Ok(counts)
    }
}
