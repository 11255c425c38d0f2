//! Thin axum router over the ingest and moderation services.
//!
//! The routing layer owns nothing: it extracts transport context
//! (fingerprint header, bearer handle, source IP), hands typed requests
//! to the services and maps [`CoreError`] kinds onto status codes.
//! Error bodies carry the stable machine-readable kind; diagnostic
//! context is attached only in debug builds.

use crate::environment::Environment;
use crate::gate::{RequestContext, SubmitReportRequest};
use crate::providers::{
    AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportQuery, ReportStore,
    SortOrder,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use civicwatch_core::error::CoreError;
use civicwatch_core::geo::GeoPoint;
use civicwatch_core::principal::{Permission, Principal};
use civicwatch_core::report::{Report, ReportStatus};
use civicwatch_core::types::ReportId;
use serde::{Deserialize, Serialize};

/// Build the ingest router over an environment.
pub fn router<C, P, D, R, N, A>(env: Environment<C, P, D, R, N, A>) -> Router
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/reports", post(submit_report).get(list_reports))
        .route("/reports/:id/status", post(change_status))
        .route("/reports/:id/validate", post(validate_report))
        .route("/reports/:id", delete(delete_report))
        .with_state(env)
}

/// Transport error wrapper carrying the stable kind.
struct ApiError(CoreError);

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match error.kind() {
            "missing_field" | "invalid_value" => StatusCode::BAD_REQUEST,
            "unauthenticated" => StatusCode::UNAUTHORIZED,
            "forbidden_role" | "duplicate_validation" | "self_validation" => {
                StatusCode::FORBIDDEN
            }
            "quarantined" | "account_locked" => StatusCode::LOCKED,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail never reaches callers.
        let message = if error.is_internal() {
            "Internal error".to_string()
        } else {
            error.to_string()
        };

        #[cfg(debug_assertions)]
        let context = Some(format!("{error:?}"));
        #[cfg(not(debug_assertions))]
        let context = None;

        let body = ErrorBody {
            kind: error.kind(),
            message,
            context,
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(error)
    }
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };
    let bearer = header("authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(ToString::to_string));
    RequestContext {
        fingerprint: header("x-device-fingerprint"),
        bearer_principal: bearer,
        ip: header("x-forwarded-for")
            .map(|raw| raw.split(',').next().unwrap_or("").trim().to_string()),
        signature: None,
    }
}

/// Resolve a bearer principal that must exist (operator endpoints).
async fn require_operator<C, P, D, R, N, A>(
    env: &Environment<C, P, D, R, N, A>,
    context: &RequestContext,
    permission: Permission,
) -> Result<Principal, ApiError>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    let identity = env.resolve_identity(context).await?;
    if identity.principal.ephemeral {
        return Err(ApiError(CoreError::Unauthenticated));
    }
    if !identity.principal.has_permission(permission) {
        return Err(ApiError(CoreError::ForbiddenRole {
            required: format!("{permission:?}"),
        }));
    }
    Ok(identity.principal)
}

// ═══════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════

async fn submit_report<C, P, D, R, N, A>(
    State(env): State<Environment<C, P, D, R, N, A>>,
    headers: HeaderMap,
    Json(body): Json<SubmitReportRequest>,
) -> Result<Response, ApiError>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    let context = request_context(&headers);
    let response = env.submit_report(body, context).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    status: Option<String>,
    r#type: Option<String>,
    severity: Option<u8>,
    gender_sensitive: Option<bool>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

/// Public feed projection: obfuscated coordinates only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicReport {
    id: ReportId,
    r#type: String,
    description: String,
    severity: u8,
    timestamp: chrono::DateTime<chrono::Utc>,
    status: &'static str,
    coordinates: [f64; 2],
    address: Option<String>,
    community_trust: f64,
    media: Vec<String>,
}

impl PublicReport {
    fn from_report(report: &Report) -> Self {
        let GeoPoint { lng, lat } = report.location.public_point;
        Self {
            id: report.id,
            r#type: report.incident_type.clone(),
            description: report.description.clone(),
            severity: report.severity.get(),
            timestamp: report.timestamp,
            status: report.status.as_str(),
            coordinates: [lng, lat],
            address: report.location.address.clone(),
            community_trust: report.community.trust_score,
            media: report.media.clone(),
        }
    }
}

async fn list_reports<C, P, D, R, N, A>(
    State(env): State<Environment<C, P, D, R, N, A>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    let context = request_context(&headers);
    let identity = env.resolve_identity(&context).await?;
    let is_moderator = identity.principal.has_permission(Permission::Moderation);

    let statuses = if is_moderator {
        match query.status.as_deref() {
            Some(raw) => vec![ReportStatus::from_str(raw)?],
            // Admins see everything except archived by default.
            None => vec![
                ReportStatus::Pending,
                ReportStatus::Approved,
                ReportStatus::Rejected,
                ReportStatus::Flagged,
                ReportStatus::UnderReview,
                ReportStatus::Verified,
            ],
        }
    } else {
        // Public callers only ever see the public feed.
        match query.status.as_deref() {
            Some(raw) => {
                let wanted = ReportStatus::from_str(raw)?;
                if wanted.is_public() {
                    vec![wanted]
                } else {
                    vec![]
                }
            }
            None => vec![ReportStatus::Approved, ReportStatus::Verified],
        }
    };
    if statuses.is_empty() {
        return Ok(Json(Vec::<PublicReport>::new()).into_response());
    }

    let reports = env
        .reports
        .list(&ReportQuery {
            statuses,
            incident_type: query.r#type,
            min_severity: query.severity,
            gender_sensitive: query.gender_sensitive,
            sort_by: query.sort_by,
            sort_order: match query.sort_order.as_deref() {
                Some("asc") => SortOrder::Asc,
                _ => SortOrder::Desc,
            },
            limit: 100,
            offset: 0,
        })
        .await?;

    if is_moderator {
        Ok(Json(reports).into_response())
    } else {
        let public: Vec<PublicReport> = reports.iter().map(PublicReport::from_report).collect();
        Ok(Json(public).into_response())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: String,
    moderation_reason: Option<String>,
}

async fn change_status<C, P, D, R, N, A>(
    State(env): State<Environment<C, P, D, R, N, A>>,
    Path(id): Path<uuid::Uuid>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Response, ApiError>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    let context = request_context(&headers);
    let moderator = require_operator(&env, &context, Permission::Moderation).await?;
    let status = ReportStatus::from_str(&body.status)?;
    let report = env
        .change_report_status(&moderator, ReportId(id), status, body.moderation_reason)
        .await?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody {
    is_positive: bool,
}

async fn validate_report<C, P, D, R, N, A>(
    State(env): State<Environment<C, P, D, R, N, A>>,
    Path(id): Path<uuid::Uuid>,
    headers: HeaderMap,
    Json(body): Json<ValidateBody>,
) -> Result<Response, ApiError>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    let context = request_context(&headers);
    let outcome = env
        .validate_report(ReportId(id), body.is_positive, &context)
        .await?;
    Ok(Json(outcome).into_response())
}

async fn delete_report<C, P, D, R, N, A>(
    State(env): State<Environment<C, P, D, R, N, A>>,
    Path(id): Path<uuid::Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    C: CacheStore + Clone + Send + Sync + 'static,
    P: PrincipalStore + Clone + Send + Sync + 'static,
    D: DeviceStore + Clone + Send + Sync + 'static,
    R: ReportStore + Clone + Send + Sync + 'static,
    N: Notifier + Clone + Send + Sync + 'static,
    A: AuditSink + Clone + Send + Sync + 'static,
{
    let context = request_context(&headers);
    let moderator = require_operator(&env, &context, Permission::Moderation).await?;
    env.delete_report(&moderator, ReportId(id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
