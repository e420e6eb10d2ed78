//! VDO Operations API
//!
//! Small HTTP surface over the operations backend: job status lookup and the
//! host network-copy trigger, both behind the identity token authorizer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use vdo_core::aws::dynamo::DynamoClient;
use vdo_core::aws::Credentials;
use vdo_core::config::Config;
use vdo_core::store::jobs::JobStore;
use vdo_core::tasks::TaskContext;

mod auth;
mod error;
mod routes;

#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub identity_endpoint: String,
    pub jobs: Arc<JobStore>,
    pub tasks: Arc<TaskContext>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/jobs/:job_id", get(routes::get_job))
        .route("/host/:device_id/network_copy", post(routes::network_copy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authorize,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let credentials = Credentials::from_env()?;
    let dynamo = DynamoClient::new(&config.dynamodb_endpoint, &config.region, credentials)
        .context("cannot build dynamo client")?;

    let state = AppState {
        http: vdo_core::http::client()?,
        identity_endpoint: config.identity_endpoint.clone(),
        jobs: Arc::new(JobStore::new(dynamo, &config.jobs_table())),
        tasks: Arc::new(TaskContext::from_config(&config)?),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, stage = config.stage.as_str(), "vdo-api listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
