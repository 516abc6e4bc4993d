//! HTTP façade over the supervisor

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use shopguard_common::{Catalog, ConflictResponse, Error, TestRequest};

use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/tests", get(list_tests_handler).post(submit_test_handler))
        .route("/api/tests/:task_id", get(get_test_handler))
        .route("/api/tests/:task_id/stop", post(stop_test_handler))
        .route("/api/products", get(list_products_handler))
        .route("/api/reports", get(list_reports_handler))
        .route("/api/reports/:report_id", get(get_report_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(err: Error) -> Response {
    match err {
        Error::Conflict { active_task_id } => (
            StatusCode::CONFLICT,
            Json(ConflictResponse::new(active_task_id)),
        )
            .into_response(),
        Error::NotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
        Error::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
        other => {
            error!("Request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": other.to_string() })),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "shopguardd",
        "version": shopguard_common::VERSION,
        "active_task_id": state.supervisor.active(),
    }))
}

async fn submit_test_handler(
    State(state): State<AppState>,
    Json(request): Json<TestRequest>,
) -> Response {
    match state.supervisor.submit(request) {
        Ok(submitted) => (StatusCode::ACCEPTED, Json(submitted)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_tests_handler(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.supervisor.list())).into_response()
}

async fn get_test_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    match state.supervisor.status(&task_id) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stop_test_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    match state.supervisor.stop(&task_id).await {
        Ok(stopped) => (StatusCode::OK, Json(stopped)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_products_handler(State(state): State<AppState>) -> Response {
    let path = state.supervisor.config().catalog_path();
    if !path.exists() {
        return error_response(Error::not_found("catalog", path.display().to_string()));
    }
    match Catalog::load(&path) {
        Ok(catalog) => (StatusCode::OK, Json(catalog)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_reports_handler(State(state): State<AppState>) -> Response {
    match state.supervisor.reports().list() {
        Ok(reports) => (StatusCode::OK, Json(reports)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_report_handler(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Response {
    match state.supervisor.reports().load(&report_id) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use axum::body::Body;
    use axum::http::Request;
    use shopguard_common::{
        ReportListing, StopResponse, SubmitResponse, TaskSnapshot, TaskStatus, TestMode, TestScope,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, script: &str) -> (Router, AppState) {
        let mut config = DaemonConfig {
            data_dir: dir.path().to_path_buf(),
            ..DaemonConfig::default()
        };
        config.worker.program = "/bin/sh".to_string();
        config.worker.args = vec!["-c".into(), script.into(), "shopguard-worker".into()];
        config.supervisor.stop_grace_secs = 1;
        let state = AppState {
            supervisor: Supervisor::new(config),
        };
        (router(state.clone()), state)
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn request_body() -> serde_json::Value {
        serde_json::to_value(TestRequest::new(
            TestScope::Product {
                product_id: "trail-bike".to_string(),
            },
            TestMode::Quick,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir, "exit 0");
        let (status, body) = call(&router, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["active_task_id"].is_null());
    }

    #[tokio::test]
    async fn test_submit_conflict_and_stop() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir, "sleep 30");

        let (status, body) = call(&router, "POST", "/api/tests", Some(request_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let submitted: SubmitResponse = serde_json::from_value(body).unwrap();

        let (status, body) = call(&router, "POST", "/api/tests", Some(request_body())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let conflict: ConflictResponse = serde_json::from_value(body).unwrap();
        assert!(conflict.conflict);
        assert_eq!(conflict.active_task_id, submitted.task_id);

        let uri = format!("/api/tests/{}/stop", submitted.task_id);
        let (status, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let stopped: StopResponse = serde_json::from_value(body).unwrap();
        assert!(stopped.stopped);

        let (_, body) = call(&router, "POST", &uri, None).await;
        let again: StopResponse = serde_json::from_value(body).unwrap();
        assert!(!again.stopped);
        assert_eq!(again.status, TaskStatus::Stopped);

        let (status, body) = call(&router, "GET", "/api/tests", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_and_report_after_completion() {
        let dir = TempDir::new().unwrap();
        let (router, state) = app(
            &dir,
            "echo '[1/1] Testing product: Trail Bike'; echo 'Product ID: trail-bike'; \
             echo '[Step 1] Page access'; echo '  ✓ Result: ok'; \
             echo 'Scenario finished: PASSED'; exit 0",
        );

        let (_, body) = call(&router, "POST", "/api/tests", Some(request_body())).await;
        let submitted: SubmitResponse = serde_json::from_value(body).unwrap();

        let uri = format!("/api/tests/{}", submitted.task_id);
        let mut snapshot: Option<TaskSnapshot> = None;
        for _ in 0..100 {
            let (status, body) = call(&router, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            let current: TaskSnapshot = serde_json::from_value(body).unwrap();
            if current.report_path.is_some() {
                snapshot = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert!(state.supervisor.active().is_none());

        let (status, body) = call(&router, "GET", "/api/reports", None).await;
        assert_eq!(status, StatusCode::OK);
        let listings: Vec<ReportListing> = serde_json::from_value(body).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, submitted.task_id);

        let uri = format!("/api/reports/{}", submitted.task_id);
        let (status, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["passed"], 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_404() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir, "exit 0");
        for uri in ["/api/tests/nope", "/api/reports/nope", "/api/products"] {
            let (status, body) = call(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert!(body["error"].is_string());
        }
        let (status, _) = call(&router, "POST", "/api/tests/nope/stop", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_request_is_400() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir, "exit 0");
        let body = serde_json::json!({ "scope": { "kind": "category", "category": " " }, "mode": "quick" });
        let (status, _) = call(&router, "POST", "/api/tests", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_products_from_catalog() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("products.json"),
            r#"{"products":[{"id":"a","name":"A","url":"https://shop.example/a","selectors":{"add_to_cart_button":".add"}}]}"#,
        )
        .unwrap();
        let (router, _) = app(&dir, "exit 0");
        let (status, body) = call(&router, "GET", "/api/products", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["products"][0]["id"], "a");
    }
}
