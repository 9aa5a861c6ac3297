//! REST transport. Every handler authenticates, resolves the tenant engine and
//! maps protocol outcomes to status codes; all error bodies are produced by
//! [`ApiError`].

use std::sync::Arc;

use axum::Json;
use axum::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequestParts, Path};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::auth::{AuthError, Credentials, Identity, TENANT_HEADER};
use crate::engine::*;
use crate::model::*;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::server::AppState;
use crate::tenant::DEFAULT_TENANT;

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    Forbidden,
    BadRequest(String),
    Unavailable(&'static str),
    Tenant(std::io::Error),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(e) => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                warn!("rejected request: {e}");
                (StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"}))
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, json!({"error": "forbidden"})),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "bad_request", "detail": detail}),
            ),
            ApiError::Unavailable(reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({"error": reason}))
            }
            ApiError::Tenant(e) if e.kind() == std::io::ErrorKind::InvalidInput => (
                StatusCode::BAD_REQUEST,
                json!({"error": "bad_request", "detail": e.to_string()}),
            ),
            ApiError::Tenant(e) => {
                error!("tenant unavailable: {e}");
                (StatusCode::SERVICE_UNAVAILABLE, json!({"error": "tenant_unavailable"}))
            }
            ApiError::Engine(e) => {
                let code = e.code();
                match e {
                    EngineError::SlotNotFound(_) => (StatusCode::NOT_FOUND, json!({"error": code})),
                    EngineError::SlotBooked(_) => (StatusCode::CONFLICT, json!({"error": code})),
                    EngineError::DayNotEnabled { enabled_days, .. } => (
                        StatusCode::BAD_REQUEST,
                        json!({"error": code, "enabled_days": enabled_days}),
                    ),
                    EngineError::NoActivePeriod => {
                        (StatusCode::SERVICE_UNAVAILABLE, json!({"error": code}))
                    }
                    other => {
                        error!("request failed: {other}");
                        (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": code}))
                    }
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Extractors ───────────────────────────────────────────────────

/// An authenticated caller bound to its tenant's engine.
pub struct Caller {
    pub identity: Identity,
    pub engine: Arc<Engine>,
}

impl Caller {
    fn claimant(&self) -> Claimant {
        Claimant::holder(self.identity.holder.clone())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let identity = state
            .auth
            .verify(Credentials::from_headers(&parts.headers))
            .map_err(ApiError::Unauthorized)?;
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_TENANT);
        let engine = state.tenants.get_or_create(tenant).map_err(ApiError::Tenant)?;
        Ok(Caller { identity, engine })
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotRequest {
    pub slot_id: SlotId,
}

// ── Handlers ─────────────────────────────────────────────────────

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn hold(
    caller: Caller,
    payload: Result<Json<SlotRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let outcome = caller.engine.acquire(req.slot_id, &caller.claimant()).await?;
    Ok(match outcome {
        AcquireOutcome::Acquired { hold, ttl, renewed } => Json(json!({
            "ok": true,
            "slot_id": hold.slot_id,
            "owner": hold.owner,
            "ttl": ttl_secs(ttl),
            "renewed": renewed,
        }))
        .into_response(),
        AcquireOutcome::Conflict(conflict) => conflict_response(&conflict),
    })
}

fn conflict_response(conflict: &Conflict) -> Response {
    let body = match conflict {
        Conflict::HeldByOther { owner, ttl } => json!({
            "error": conflict.reason(),
            "held_by": owner,
            "ttl": ttl_secs(*ttl),
        }),
        Conflict::HolderHasOther { slot_id, ttl } => json!({
            "error": conflict.reason(),
            "slot_id": slot_id,
            "ttl": ttl_secs(*ttl),
        }),
    };
    (StatusCode::CONFLICT, Json(body)).into_response()
}

pub async fn release(
    caller: Caller,
    payload: Result<Json<SlotRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let outcome = caller.engine.release(req.slot_id, &caller.claimant()).await?;
    Ok(match outcome {
        ReleaseOutcome::Released { .. } => Json(json!({"ok": true, "released": true})).into_response(),
        ReleaseOutcome::NoHold => Json(json!({"ok": true, "released": false})).into_response(),
        ReleaseOutcome::NotOwner => {
            (StatusCode::FORBIDDEN, Json(json!({"error": outcome.reason()}))).into_response()
        }
    })
}

pub async fn commit(
    caller: Caller,
    payload: Result<Json<SlotRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let outcome = caller.engine.commit(req.slot_id, &caller.claimant()).await?;
    Ok(match outcome {
        CommitOutcome::Committed { .. } => Json(json!({
            "ok": true,
            "slot_id": req.slot_id,
            "status": SlotStatus::Booked.label(),
        }))
        .into_response(),
        CommitOutcome::NoHold => {
            (StatusCode::CONFLICT, Json(json!({"error": "no_hold"}))).into_response()
        }
        CommitOutcome::NotOwner => {
            (StatusCode::FORBIDDEN, Json(json!({"error": "not_owner"}))).into_response()
        }
    })
}

pub async fn status(
    caller: Caller,
    slot: Result<Path<SlotId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(slot_id) = slot?;
    let status = caller.engine.status(slot_id).await?;
    let mut body = json!({"slot_id": slot_id, "status": status.label()});
    if let SlotStatus::Held { owner, ttl } = &status {
        body["owner"] = json!(owner);
        body["ttl"] = json!(ttl_secs(*ttl));
    }
    Ok(Json(body))
}

/// Coordinator view of every live hold in the tenant.
pub async fn list_holds(caller: Caller) -> Result<Json<Value>, ApiError> {
    if !caller.identity.coordinator {
        return Err(ApiError::Forbidden);
    }
    let items = caller.engine.list_holds().await?;
    Ok(Json(json!({"items": items})))
}

pub async fn snapshot(
    caller: Caller,
    day: Result<Path<Day>, PathRejection>,
) -> Result<Json<DaySnapshot>, ApiError> {
    let Path(day) = day?;
    Ok(Json(caller.engine.snapshot(day).await?))
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
}
