//! Admission webhook.
//!
//! Validates creation of pipeline-run objects: every CREATE triggers a fresh
//! read of the decision store, so gate changes propagate within store read
//! latency rather than any webhook-local cache TTL. Updates and deletes are
//! always allowed; this gate only restricts creation.
//!
//! Outcome policy: a confirmed-absent record allows (fail-open), an explicit
//! deny denies, and a store read *error* denies (fail-closed) — an unknown
//! gate state must not admit new work.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use pipeshield_store::DecisionStore;

/// Reason returned to callers while the gate is closed.
pub const DENY_REASON: &str =
    "pipeline run ingress is currently disabled: etcd is under excessive load";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DecisionStore>,
}

/// Webhook router: `POST /validate`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .with_state(state)
}

/// Liveness/readiness router, served on the probe listener.
pub fn probe_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

async fn validate(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Response {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting malformed admission review");
            return (StatusCode::BAD_REQUEST, format!("invalid admission review: {err}"))
                .into_response();
        }
    };

    let mut response = AdmissionResponse::from(&request);
    if matches!(request.operation, Operation::Create) {
        match state.store.read().await {
            Ok(gate) => {
                if !gate.allowed_or_default() {
                    tracing::info!(
                        kind = %request.kind.kind,
                        name = %request.name,
                        namespace = ?request.namespace,
                        "denying pipeline run creation, gate is closed"
                    );
                    response = response.deny(DENY_REASON);
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to read gate state, denying admission");
                response = response.deny(format!("failed to read gate state: {err}"));
            }
        }
    }

    Json(response.into_review()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeshield_store::MemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn review_body(operation: &str) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-41b7-9caf-90c87cf6f110",
                "kind": { "group": "tekton.dev", "version": "v1", "kind": "PipelineRun" },
                "resource": { "group": "tekton.dev", "version": "v1", "resource": "pipelineruns" },
                "name": "build-123",
                "namespace": "tenant-a",
                "operation": operation,
                "userInfo": { "username": "system:serviceaccount:tenant-a:builder" },
                "object": {
                    "apiVersion": "tekton.dev/v1",
                    "kind": "PipelineRun",
                    "metadata": { "name": "build-123", "namespace": "tenant-a" }
                },
                "dryRun": false
            }
        })
    }

    async fn post_review(app: Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/validate")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn app_with(store: Arc<MemoryStore>) -> Router {
        router(AppState { store })
    }

    #[tokio::test]
    async fn allows_creation_before_any_reconciliation() {
        // No record written yet: fail-open.
        let (status, body) = post_review(
            app_with(Arc::new(MemoryStore::new())),
            review_body("CREATE"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn denies_creation_while_gate_is_closed() {
        let store = Arc::new(MemoryStore::new());
        store.write(false).await.unwrap();

        let (status, body) = post_review(app_with(store), review_body("CREATE")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        let message = body["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("ingress is currently disabled"));
    }

    #[tokio::test]
    async fn consults_live_state_not_a_cache() {
        let store = Arc::new(MemoryStore::new());
        store.write(true).await.unwrap();
        let app = app_with(store.clone());

        let (_, body) = post_review(app.clone(), review_body("CREATE")).await;
        assert_eq!(body["response"]["allowed"], json!(true));

        store.write(false).await.unwrap();

        let (_, body) = post_review(app, review_body("CREATE")).await;
        assert_eq!(body["response"]["allowed"], json!(false));
    }

    #[tokio::test]
    async fn allows_updates_and_deletes_unconditionally() {
        let store = Arc::new(MemoryStore::new());
        store.write(false).await.unwrap();
        let app = app_with(store);

        for operation in ["UPDATE", "DELETE"] {
            let (status, body) = post_review(app.clone(), review_body(operation)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                body["response"]["allowed"],
                json!(true),
                "{operation} must not be gated"
            );
        }
    }

    #[tokio::test]
    async fn fails_closed_on_store_read_error() {
        let store = Arc::new(MemoryStore::new());
        store.write(true).await.unwrap();
        store.set_fail_reads(true);

        let (status, body) = post_review(app_with(store), review_body("CREATE")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        let message = body["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("failed to read gate state"));
    }

    #[tokio::test]
    async fn rejects_review_without_a_request() {
        let body = json!({ "apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview" });
        let (status, _) = post_review(app_with(Arc::new(MemoryStore::new())), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn response_echoes_the_request_uid() {
        let (_, body) = post_review(
            app_with(Arc::new(MemoryStore::new())),
            review_body("CREATE"),
        )
        .await;
        assert_eq!(
            body["response"]["uid"],
            json!("705ab4f5-6393-41b7-9caf-90c87cf6f110")
        );
    }
}
