use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use super::DashboardState;
use crate::{
    domain::{Feedback, InboxBehaviour},
    infrastructure::notifier::NotificationLevel,
    tasks::{coordinator::AccountStats, queue::ActivityEntry},
};

pub async fn health(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "recent": state.queue.len() }))
}

#[derive(Serialize)]
struct AccountView {
    name: String,
    host: String,
    inbox: String,
    quarantine: String,
    behaviour: InboxBehaviour,
    #[serde(flatten)]
    stats: AccountStats,
}

pub async fn accounts(State(state): State<DashboardState>) -> impl IntoResponse {
    let views: Vec<AccountView> = state
        .accounts
        .iter()
        .map(|account| AccountView {
            name: account.config.name.clone(),
            host: account.config.host.clone(),
            inbox: account.config.inbox.clone(),
            quarantine: account.config.quarantine.clone(),
            behaviour: account.config.behaviour,
            stats: account.stats(),
        })
        .collect();
    Json(views)
}

/// Recent verdicts, newest first, without bodies.
pub async fn mails(State(state): State<DashboardState>) -> Response {
    let entries = state.queue.list();
    let newest_first: Vec<&ActivityEntry> = entries.iter().rev().map(|entry| &**entry).collect();
    Json(newest_first).into_response()
}

#[derive(Serialize)]
struct MailDetail<'a> {
    #[serde(flatten)]
    entry: &'a ActivityEntry,
    body: String,
}

pub async fn mail(
    State(state): State<DashboardState>,
    Path(fingerprint): Path<String>,
) -> Response {
    match state.queue.find_by_fingerprint(&fingerprint) {
        Some(entry) => Json(MailDetail {
            entry: &entry,
            body: String::from_utf8_lossy(&entry.body).into_owned(),
        })
        .into_response(),
        None => not_found(&fingerprint),
    }
}

/// Forwards the stored message to every enabled backend for learning.
pub async fn feedback(
    State(state): State<DashboardState>,
    Path((fingerprint, feedback)): Path<(String, Feedback)>,
) -> Response {
    let Some(entry) = state.queue.find_by_fingerprint(&fingerprint) else {
        return not_found(&fingerprint);
    };

    let backends: Vec<_> = state.classifiers.enabled().cloned().collect();
    if backends.is_empty() {
        state
            .notifications
            .set(NotificationLevel::Danger, "no spam backend is enabled");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no spam backend is enabled" })),
        )
            .into_response();
    }

    let mut learned = Vec::new();
    let mut failures = Vec::new();
    for backend in backends {
        match backend.learn(&entry.body, feedback).await {
            Ok(()) => learned.push(backend.backend().to_string()),
            Err(err) => {
                tracing::warn!(target: "dashboard", fingerprint = %fingerprint, error = %err, "learning failed");
                failures.push(err.to_string());
            }
        }
    }

    if failures.is_empty() {
        tracing::info!(target: "dashboard", fingerprint = %fingerprint, %feedback, "message learned");
        state.notifications.set(
            NotificationLevel::Success,
            format!("\"{}\" learned as {feedback}", entry.subject),
        );
        Json(json!({ "learned": learned })).into_response()
    } else {
        state.notifications.set(
            NotificationLevel::Danger,
            format!("learning \"{}\" as {feedback} failed", entry.subject),
        );
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "learned": learned, "errors": failures })),
        )
            .into_response()
    }
}

/// Returns the pending flash message and clears it.
pub async fn notification(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.notifications.take())
}

pub async fn metrics(State(state): State<DashboardState>) -> Response {
    if !state.collect_metrics {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

fn not_found(fingerprint: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no recent message {fingerprint}") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        classifier::{Classifier, Classifiers},
        dashboard::router,
        domain::{Backend, ClassifierError, FetchedMessage, ScoreResult, SpamAction, Verdict},
        infrastructure::{metrics::MetricsSink, notifier::NotificationState},
        tasks::queue::{fingerprint, RecentActivityQueue},
    };

    const RAW: &[u8] = b"From: promo@example.org\r\nSubject: Deal\r\n\r\nbuy\r\n";

    #[derive(Default)]
    struct Learner {
        taught: Mutex<Vec<Feedback>>,
    }

    #[async_trait]
    impl Classifier for Learner {
        fn backend(&self) -> Backend {
            Backend::Rspamd
        }

        async fn score(&self, _body: &[u8]) -> ScoreResult {
            Err(ClassifierError::Protocol {
                backend: Backend::Rspamd,
                message: "unused".into(),
            })
        }

        async fn learn(&self, _body: &[u8], feedback: Feedback) -> Result<(), ClassifierError> {
            self.taught.lock().push(feedback);
            Ok(())
        }
    }

    fn state(learner: Arc<Learner>) -> DashboardState {
        let queue = Arc::new(RecentActivityQueue::default());
        let message = FetchedMessage::new(1, RAW.to_vec(), None);
        queue.push(ActivityEntry::new(
            "work",
            &message,
            &Verdict::new(6.5, SpamAction::RewriteSubject),
        ));
        DashboardState {
            queue,
            metrics: Arc::new(MetricsSink::new()),
            notifications: Arc::new(NotificationState::new()),
            classifiers: Classifiers {
                spamd: None,
                rspamd: Some(learner),
            },
            accounts: Vec::new(),
            collect_metrics: true,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lists_recent_mails_without_bodies() {
        let app = router(state(Arc::default()));
        let response = app
            .oneshot(Request::builder().uri("/api/mails").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["subject"], "Deal");
        assert_eq!(json[0]["action"], "rewrite subject");
        assert!(json[0].get("body").is_none());
    }

    #[tokio::test]
    async fn detail_includes_the_body() {
        let app = router(state(Arc::default()));
        let uri = format!("/api/mails/{}", fingerprint(RAW));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["body"], String::from_utf8_lossy(RAW).as_ref());

        let missing = router(state(Arc::default()))
            .oneshot(Request::builder().uri("/api/mails/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn feedback_teaches_backends_and_flashes_once() {
        let learner = Arc::new(Learner::default());
        let state = state(learner.clone());
        let app = router(state.clone());

        let uri = format!("/api/mails/{}/ham", fingerprint(RAW));
        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*learner.taught.lock(), vec![Feedback::Ham]);

        let flash = app
            .clone()
            .oneshot(Request::builder().uri("/api/notification").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(flash).await;
        assert_eq!(json["level"], "success");

        let again = app
            .oneshot(Request::builder().uri("/api/notification").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_json(again).await.is_null());

        let text = state.metrics.render();
        assert!(text.contains("route=\"/api/mails/{fingerprint}/{feedback}\",status=\"200\""));
    }

    #[tokio::test]
    async fn health_reports_recent_count() {
        let response = router(state(Arc::default()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["recent"], 1);
    }

    #[tokio::test]
    async fn metrics_can_be_switched_off() {
        let mut state = state(Arc::default());
        state.collect_metrics = false;
        let response = router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
