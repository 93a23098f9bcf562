//! HTTP surface for jobs plus the CF error envelope.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use stratus_core::Identity;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::presenter::JobResponse;
use crate::resolver::{JobError, JobResolver};

pub const JOB_PATH: &str = "/v3/jobs/{guid}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfError {
    pub code: u32,
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<CfError>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{resource_type} not found")]
    NotFound { resource_type: String },
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_cf_error(&self) -> CfError {
        match self {
            ApiError::NotFound { resource_type } => CfError {
                code: 10010,
                title: "CF-ResourceNotFound".into(),
                detail: format!("{resource_type} not found. Ensure it exists and you have access to it."),
            },
            ApiError::Unknown(_) => CfError {
                code: 10001,
                title: "UnknownError".into(),
                detail: "An unknown error occurred.".into(),
            },
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound { resource_type, .. } => ApiError::NotFound { resource_type: resource_type.to_string() },
            other => ApiError::Unknown(format!("{other:#}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope { errors: vec![self.to_cf_error()] };
        (self.status_code(), Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct JobsState {
    pub resolver: Arc<JobResolver>,
    pub server_url: Arc<Url>,
}

impl JobsState {
    pub fn new(resolver: JobResolver, server_url: Url) -> Self {
        Self { resolver: Arc::new(resolver), server_url: Arc::new(server_url) }
    }
}

pub fn router(state: JobsState) -> Router {
    Router::new().route(JOB_PATH, get(get_job)).with_state(state)
}

/// `GET /v3/jobs/{guid}`. Identity is provided by upstream auth middleware as a request
/// extension; anonymous requests run with the default identity.
async fn get_job(
    State(state): State<JobsState>,
    identity: Option<Extension<Identity>>,
    Path(guid): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let t0 = Instant::now();
    let identity = identity.map(|Extension(i)| i).unwrap_or_default();
    // Dropping this handler (client went away) cancels any in-flight polling.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.resolver.resolve(&identity, &guid, &cancel).await {
        Ok((job, status)) => {
            info!(job_guid = %guid, state = ?status.state(), took_ms = %t0.elapsed().as_millis(), "job resolved");
            Ok(Json(JobResponse::for_job(&job, &status, &state.server_url)))
        }
        Err(e) => {
            if !matches!(e, JobError::NotFound { .. }) {
                error!(job_guid = %guid, error = %e, "job resolution failed");
            }
            Err(e.into())
        }
    }
}
