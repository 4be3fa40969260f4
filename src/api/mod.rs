use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::BrokerError;
use crate::scheduler::{Job, JobQueue, JobSpec, JobStatusInfo};

#[derive(Clone)]
pub struct ApiState {
    pub job_queue: Arc<RwLock<JobQueue>>,
    pub max_batch_size: usize,
}

impl ApiState {
    pub fn new(job_queue: JobQueue, max_batch_size: usize) -> Self {
        Self {
            job_queue: Arc::new(RwLock::new(job_queue)),
            max_batch_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollRequest {
    #[serde(default)]
    pub preferred_resource_ids: Vec<String>,
    pub max: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct CompleteResponse {
    job_id: String,
    task: i64,
    accepted: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            match &self {
                BrokerError::DuplicateJob(_) => StatusCode::CONFLICT,
                BrokerError::JobNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            }
        } else if matches!(self, BrokerError::QueueFull(_)) {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            tracing::error!(error = %self, "Internal broker error");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/jobs/:job_id", put(submit_job_handler).get(get_job_handler))
        .route(
            "/jobs/:job_id/tasks/:task/complete",
            post(complete_task_handler),
        )
        .route("/work", post(poll_handler))
        .route("/status", get(status_text_handler))
        .route("/status.json", get(status_json_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening for broker requests");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn index_handler() -> &'static str {
    "Echo answers \"whatever\""
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(spec): Json<JobSpec>,
) -> Result<impl IntoResponse, BrokerError> {
    if spec.id != job_id {
        return Err(BrokerError::InvalidJob(format!(
            "job id in body ({}) does not match path ({})",
            spec.id, job_id
        )));
    }

    let mut queue = state.job_queue.write().await;
    let job = queue.enqueue(Job::new(spec))?;
    Ok((
        StatusCode::CREATED,
        Json(JobStatusInfo::from_job(job, std::time::Instant::now())),
    ))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusInfo>, BrokerError> {
    let queue = state.job_queue.read().await;
    let job = queue
        .get_job(&job_id)
        .ok_or(BrokerError::JobNotFound(job_id))?;
    Ok(Json(JobStatusInfo::from_job(job, std::time::Instant::now())))
}

async fn poll_handler(
    State(state): State<ApiState>,
    Json(request): Json<PollRequest>,
) -> Result<Response, BrokerError> {
    let max = request.max.min(state.max_batch_size);
    let batch = state
        .job_queue
        .write()
        .await
        .select_batch(&request.preferred_resource_ids, max)?;

    Ok(match batch {
        Some(batch) => Json(batch).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn complete_task_handler(
    State(state): State<ApiState>,
    Path((job_id, task)): Path<(String, i64)>,
) -> Result<Json<CompleteResponse>, BrokerError> {
    let accepted = state.job_queue.write().await.complete(&job_id, task)?;
    Ok(Json(CompleteResponse {
        job_id,
        task,
        accepted,
    }))
}

async fn status_text_handler(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> String {
    state.job_queue.read().await.status(query.verbose).to_string()
}

async fn status_json_handler(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    Json(state.job_queue.read().await.status(query.verbose))
}
