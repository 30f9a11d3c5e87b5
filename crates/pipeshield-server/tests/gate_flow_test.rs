//! End-to-end flow: reconciler decisions propagate to admission outcomes
//! through the shared decision store only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeshield_metrics::{AlertQuerier, MetricsError};
use pipeshield_server::reconciler::{Reconciler, Strategy};
use pipeshield_server::webhook::{router, AppState};
use pipeshield_store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

struct ToggleAlert(std::sync::atomic::AtomicBool);

impl ToggleAlert {
    fn set_firing(&self, firing: bool) {
        self.0.store(firing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertQuerier for ToggleAlert {
    async fn is_alert_firing(&self, _name: &str) -> Result<bool, MetricsError> {
        Ok(self.0.load(std::sync::atomic::Ordering::SeqCst))
    }
}

fn create_review() -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "3f1c2c76-7b5b-4d0a-bb5d-1f6a9f1f9b55",
            "kind": { "group": "tekton.dev", "version": "v1", "kind": "PipelineRun" },
            "resource": { "group": "tekton.dev", "version": "v1", "resource": "pipelineruns" },
            "name": "nightly-build",
            "namespace": "tenant-b",
            "operation": "CREATE",
            "userInfo": {},
            "object": {
                "apiVersion": "tekton.dev/v1",
                "kind": "PipelineRun",
                "metadata": { "name": "nightly-build", "namespace": "tenant-b" }
            },
            "dryRun": false
        }
    })
}

async fn admit(app: &axum::Router) -> Value {
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/validate")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(create_review().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn alert_lifecycle_drives_admission_outcomes() {
    let store = Arc::new(MemoryStore::new());
    let alert = Arc::new(ToggleAlert(std::sync::atomic::AtomicBool::new(false)));
    let reconciler = Reconciler::new(
        store.clone(),
        Strategy::alert_mirror(alert.clone(), "EtcdHighLatency".into()),
        Duration::from_secs(15),
    );
    let app = router(AppState {
        store: store.clone(),
    });

    // Before any reconciliation pass the store is empty: fail-open.
    let body = admit(&app).await;
    assert_eq!(body["response"]["allowed"], json!(true));

    // Alert starts firing; the next pass closes the gate.
    alert.set_firing(true);
    reconciler.process().await.unwrap();
    let body = admit(&app).await;
    assert_eq!(body["response"]["allowed"], json!(false));
    assert!(body["response"]["status"]["message"]
        .as_str()
        .unwrap()
        .contains("ingress is currently disabled"));

    // Alert resolves; the next pass reopens it.
    alert.set_firing(false);
    reconciler.process().await.unwrap();
    let body = admit(&app).await;
    assert_eq!(body["response"]["allowed"], json!(true));
}
