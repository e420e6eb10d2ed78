//! Route handlers.

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;
use vdo_core::store::jobs::Job;
use vdo_core::tasks;

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.jobs.get(&auth.domain_id, &job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::NotFound(format!("job {job_id}"))),
    }
}

/// Accept a network copy from one hypervisor to another and run it in the
/// background; the response carries the job id to poll.
pub async fn network_copy(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(device_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let to_host = body["toHost"]
        .as_str()
        .ok_or_else(|| ApiError::Validation("missing required field toHost".to_string()))?;

    // The task event wants the owning vCenter; resolve it up front so a bad
    // device id fails the request instead of the background job.
    let hypervisor = state
        .tasks
        .zamboni
        .get_hyps_by_device_id(&device_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("hypervisor {device_id}")))?;
    let hostname = hypervisor["location"]
        .as_str()
        .context("hypervisor record missing location")?
        .to_string();

    let job_id = Uuid::new_v4().to_string();
    let event = json!({
        "job_id": job_id,
        "from_device": device_id,
        "to_device": to_host,
        "hostname": hostname,
    });
    let job = Job {
        domain: auth.domain_id.clone(),
        job_id: job_id.clone(),
        status: "submitted".to_string(),
        created: Utc::now(),
        payload: event,
    };
    state.jobs.put(&job).await?;
    info!(job_id = %job_id, device_id, to_host, "accepted network copy");

    let background = state.clone();
    tokio::spawn(async move { run_network_copy(background, job).await });

    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

async fn run_network_copy(state: AppState, mut job: Job) {
    let result = tasks::dispatch(&state.tasks, "network_copy", &job.payload).await;
    job.status = match result {
        Ok(_) => "complete".to_string(),
        Err(error) => {
            warn!(job_id = %job.job_id, error = %format!("{error:#}"), "network copy failed");
            "failed".to_string()
        }
    };
    if let Err(error) = state.jobs.put(&job).await {
        warn!(job_id = %job.job_id, error = %error, "cannot record job status");
    }
}
