//! JSON API: job management plus thin relays to the account-data proxy.
//! The API reads and writes job records but never executes jobs; the
//! worker process owns execution.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::db;
use crate::db::model::Connection;
use crate::instagram::model::{Account, Connections, User};
use crate::instagram::{InstagramService, ProxyError};
use crate::model::{CopyJobMetadata, Job, JobFrequency, JobState, JobType};

/// Shared state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::Pool,
    pub instagram: Arc<dyn InstagramService>,
}

/// Assemble the full router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/instaman/jobs", get(find_job))
        .route("/instaman/jobs/all", get(find_jobs))
        .route(
            "/instaman/jobs/copy",
            get(find_copy_job).post(create_copy_job),
        )
        .route("/instagram/me", get(me))
        .route("/instagram/account/:name", get(account_by_name))
        .route("/instagram/account-id/:id", get(account_by_id))
        .route("/instagram/followers/:id", get(followers))
        .route("/instagram/following/:id", get(following))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// API failures, serialized as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(err) => {
                warn!(?err, "internal error serving HTTP request");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotFound => ApiError::NotFound(err.to_string()),
            ProxyError::Status(_) | ProxyError::Transport(_) | ProxyError::InvalidJson(_) => {
                ApiError::Upstream(err.to_string())
            }
            ProxyError::InvalidUrl => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

fn parse_enum<T>(
    value: Option<String>,
    parse: fn(&str) -> Option<T>,
    what: &str,
) -> Result<Option<T>, ApiError> {
    match value.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse(&s)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {what}: {s}"))),
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db_err| db_err.is_unique_violation())
    })
}

#[derive(Debug, Deserialize)]
struct FindJobQuery {
    id: Option<i64>,
    checksum: Option<String>,
    state: Option<String>,
    #[serde(rename = "type")]
    job_type: Option<String>,
}

async fn find_job(
    State(state): State<AppState>,
    Query(q): Query<FindJobQuery>,
) -> Result<Json<Job>, ApiError> {
    if q.id.is_none() && q.checksum.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::BadRequest("requires id or checksum".into()));
    }

    let params = db::FindJobParams {
        id: q.id,
        checksum: q.checksum.filter(|s| !s.is_empty()),
        state: parse_enum(q.state, JobState::parse_state, "state")?,
        job_type: parse_enum(q.job_type, JobType::parse_type, "type")?,
    };

    let job = db::find_job(&state.pool, &params).await?;
    job.map(Json)
        .ok_or_else(|| ApiError::NotFound("job not found".into()))
}

#[derive(Debug, Deserialize)]
struct FindJobsQuery {
    state: Option<String>,
    #[serde(rename = "type")]
    job_type: Option<String>,
    order: Option<String>,
    #[serde(default)]
    page: i64,
}

async fn find_jobs(
    State(state): State<AppState>,
    Query(q): Query<FindJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let params = db::FindJobsParams {
        state: parse_enum(q.state, JobState::parse_state, "state")?,
        job_type: parse_enum(q.job_type, JobType::parse_type, "type")?,
        order: q.order,
        page: q.page,
    };

    Ok(Json(db::find_jobs(&state.pool, &params).await?))
}

/// A copy job as served by the copy-job endpoints: the job record with its
/// decoded metadata, plus harvested connections.
#[derive(Debug, Serialize)]
pub struct CopyJobResponse {
    pub id: i64,
    pub checksum: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub label: String,
    #[serde(rename = "lastRun")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(rename = "nextRun")]
    pub next_run: Option<DateTime<Utc>>,
    pub state: JobState,
    pub metadata: CopyJobMetadata,
    pub results: Vec<Connection>,
    #[serde(rename = "resultsCount")]
    pub results_count: i64,
}

impl From<db::CopyJobView> for CopyJobResponse {
    fn from(view: db::CopyJobView) -> Self {
        Self {
            id: view.job.job.id,
            checksum: view.job.job.checksum,
            job_type: view.job.job.job_type,
            label: view.job.job.label,
            last_run: view.job.job.last_run,
            next_run: view.job.job.next_run,
            state: view.job.job.state,
            metadata: view.job.metadata,
            results: view.results,
            results_count: view.total,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FindCopyJobQuery {
    direction: Option<String>,
    #[serde(rename = "userID")]
    user_id: Option<i64>,
    page: Option<i64>,
}

async fn find_copy_job(
    State(state): State<AppState>,
    Query(q): Query<FindCopyJobQuery>,
) -> Result<Json<CopyJobResponse>, ApiError> {
    let direction = q
        .direction
        .ok_or_else(|| ApiError::BadRequest("direction is required".into()))?;
    let job_type = JobType::from_direction(&direction)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid direction: {direction}")))?;
    let user_id = q
        .user_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest("userID must be a positive integer".into()))?;

    let view = db::find_copy_job(&state.pool, job_type, user_id, q.page).await?;
    view.map(|v| Json(CopyJobResponse::from(v)))
        .ok_or_else(|| ApiError::NotFound("job not found".into()))
}

#[derive(Debug, Deserialize)]
struct NewCopyJobBody {
    #[serde(default)]
    label: String,
    #[serde(rename = "type")]
    job_type: String,
    #[serde(rename = "nextRun", default)]
    next_run: Option<DateTime<Utc>>,
    metadata: NewCopyJobMetadataBody,
}

#[derive(Debug, Deserialize)]
struct NewCopyJobMetadataBody {
    #[serde(rename = "userID")]
    user_id: i64,
    #[serde(default)]
    frequency: Option<String>,
}

async fn create_copy_job(
    State(state): State<AppState>,
    Json(body): Json<NewCopyJobBody>,
) -> Result<Json<CopyJobResponse>, ApiError> {
    let job_type = JobType::parse_type(&body.job_type)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid type: {}", body.job_type)))?;
    if body.metadata.user_id < 1 {
        return Err(ApiError::BadRequest(
            "metadata.userID must be a positive integer".into(),
        ));
    }

    let frequency = body
        .metadata
        .frequency
        .as_deref()
        .and_then(JobFrequency::parse_frequency)
        .unwrap_or_default();

    let params = db::NewCopyJobParams {
        label: body.label,
        job_type,
        user_id: body.metadata.user_id,
        frequency,
        next_run: body.next_run,
    };

    let job = match db::new_copy_job(&state.pool, &params).await {
        Ok(job) => job,
        Err(err) if is_unique_violation(&err) => {
            return Err(ApiError::Conflict("job already exists".into()));
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Json(CopyJobResponse::from(db::CopyJobView {
        job,
        results: Vec::new(),
        total: 0,
    })))
}

async fn me(State(state): State<AppState>) -> Result<Json<Account>, ApiError> {
    Ok(Json(state.instagram.get_account().await?))
}

async fn account_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.instagram.get_user(&name).await?))
}

async fn account_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.instagram.get_user_by_id(id).await?))
}

#[derive(Debug, Deserialize)]
struct CursorQuery {
    next_cursor: Option<String>,
}

async fn followers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<CursorQuery>,
) -> Result<Json<Connections>, ApiError> {
    let page = state
        .instagram
        .get_followers(id, q.next_cursor.as_deref())
        .await?;
    Ok(Json(page))
}

async fn following(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<CursorQuery>,
) -> Result<Json<Connections>, ApiError> {
    let page = state
        .instagram
        .get_following(id, q.next_cursor.as_deref())
        .await?;
    Ok(Json(page))
}
