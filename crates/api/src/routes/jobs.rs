//! Routes for the `/jobs` resource.
//!
//! All endpoints require the caller identity header. Submission runs
//! the full lifecycle pipeline (validate, reserve, persist, dispatch);
//! reads go straight to the job store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use mirage_core::billing::BillingMode;
use mirage_core::error::CoreError;
use mirage_core::job::{GenerationParams, JobKind, Resolution};
use mirage_core::types::JobId;
use mirage_db::repositories::job_repo::JobRepo;
use serde::Deserialize;
use validator::Validate;

use crate::auth::AccountId;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /        -> list_jobs
/// POST   /        -> submit_job
/// GET    /{id}    -> get_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(submit_job))
        .route("/{id}", get(get_job))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Request body for `POST /jobs`.
///
/// Shape checks live here via `validator`; the kind-dependent rules
/// (e.g. image-to-video needing a source image) run in
/// `GenerationParams::validate` inside the coordinator.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    pub kind: JobKind,
    #[validate(length(min = 1, max = 2000, message = "prompt length out of bounds"))]
    pub prompt: String,
    pub source_image: Option<String>,
    #[validate(range(min = 1, max = 60, message = "duration out of bounds"))]
    pub duration_secs: i64,
    pub resolution: Resolution,
    #[serde(default)]
    pub style_flags: Vec<String>,
}

/// POST /api/v1/jobs
///
/// Submit a new generation job. Returns 201 with the submission
/// receipt (job id, state, credits charged, time estimate). Rejections
/// happen before any credits move; a dispatch failure after the
/// reservation surfaces as 502 with the credits already refunded.
async fn submit_job(
    account: AccountId,
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let params = GenerationParams {
        prompt: input.prompt,
        source_image: input.source_image,
        duration_secs: input.duration_secs,
        resolution: input.resolution,
        style_flags: input.style_flags,
    };

    let receipt = state
        .coordinator
        .submit(account.0, input.kind, params, BillingMode::Standard)
        .await?;

    tracing::info!(
        job_id = %receipt.job_id,
        account_id = account.0,
        kind = input.kind.code(),
        credits_charged = receipt.credits_charged,
        "Job submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Query parameters for `GET /jobs`.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs
///
/// List the caller's jobs, most recent first. Supports an optional
/// `limit` query parameter (clamped server-side).
async fn list_jobs(
    account: AccountId,
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = JobRepo::list_by_account(&state.pool, account.0, query.limit).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// Get a single job by ID. Jobs belonging to other accounts are
/// reported as not found.
async fn get_job(
    account: AccountId,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = JobRepo::find_by_id(&state.pool, job_id)
        .await?
        .filter(|job| job.account_id == account.0)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        }))?;

    Ok(Json(DataResponse { data: job }))
}
