mod handlers;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::{
    classifier::Classifiers,
    infrastructure::{
        metrics::MetricsSink, notifier::NotificationState, shutdown::ShutdownListener,
    },
    tasks::{coordinator::AccountState, queue::RecentActivityQueue},
};

#[derive(Clone)]
pub struct DashboardState {
    pub queue: Arc<RecentActivityQueue>,
    pub metrics: Arc<MetricsSink>,
    pub notifications: Arc<NotificationState>,
    pub classifiers: Classifiers,
    pub accounts: Vec<Arc<AccountState>>,
    pub collect_metrics: bool,
}

pub fn router(state: DashboardState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/accounts", get(handlers::accounts))
        .route("/api/mails", get(handlers::mails))
        .route("/api/mails/{fingerprint}", get(handlers::mail))
        .route("/api/mails/{fingerprint}/{feedback}", post(handlers::feedback))
        .route("/api/notification", get(handlers::notification))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(metrics, track_requests))
        .with_state(state)
}

async fn track_requests(
    State(metrics): State<Arc<MetricsSink>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let response = next.run(request).await;
    metrics.record_request(&method, &route, response.status().as_u16());
    response
}

pub async fn serve(port: u16, state: DashboardState, mut shutdown: ShutdownListener) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(target: "dashboard", port, "dashboard listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;
    tracing::info!(target: "dashboard", "dashboard stopped");
    Ok(())
}
