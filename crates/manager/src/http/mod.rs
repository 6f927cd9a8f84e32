use crate::service::{CrackService, DispatchSink, TaskMetadataPage, TaskStatusOutput};
use crate::store::{MongoStore, Store};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use validator::Validate;

mod error;
mod health;

pub use error::{ApiError, ErrorOutput};

/// Shared state of the manager's HTTP surface.
pub struct App<S, P> {
    pub service: CrackService<S, P>,
    pub probes: HealthProbes,
}

/// Dependency probes backing the readiness endpoint. Absent probes
/// (e.g. in tests) are treated as healthy.
#[derive(Clone, Default)]
pub struct HealthProbes {
    pub mongo: Option<MongoStore>,
    pub broker: Option<bus::Connection>,
}

pub fn router<S: Store, P: DispatchSink>(app: Arc<App<S, P>>) -> axum::Router {
    axum::Router::new()
        .route("/v1/hash/crack", post(create_task))
        .route("/v1/hash/crack/status", get(task_status))
        .route("/v1/hash/crack/metadatas", get(task_metadatas))
        .route("/api/manager/health/readiness", get(health::readiness))
        .route("/api/manager/health/liveness", get(health::liveness))
        .layer(axum::middleware::from_fn(error::error_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct CrackRequest {
    #[validate(custom(function = "validate_md5_hex"))]
    pub hash: String,
    #[serde(rename = "maxLength")]
    #[validate(range(min = 1, max = 6, message = "maxLength must be between 1 and 6"))]
    pub max_length: u32,
}

fn validate_md5_hex(hash: &str) -> Result<(), validator::ValidationError> {
    if hash.len() == 32 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("hash")
            .with_message("hash must be a hex-encoded MD5 digest".into()))
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CreatedOutput {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

async fn create_task<S: Store, P: DispatchSink>(
    State(app): State<Arc<App<S, P>>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<CreatedOutput>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty body"));
    }
    let request: CrackRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) if err.is_syntax() || err.is_eof() => {
            return Err(ApiError::bad_request("invalid json"));
        }
        Err(err) => return Err(ApiError::bad_request(err.to_string())),
    };
    request
        .validate()
        .map_err(|errors| ApiError::bad_request(validation_message(&errors)))?;

    let id = app
        .service
        .create_task(&request.hash, request.max_length)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreatedOutput {
            request_id: id.to_hex(),
        }),
    ))
}

#[derive(Debug, serde::Deserialize)]
struct StatusParams {
    #[serde(rename = "requestID")]
    request_id: Option<String>,
}

async fn task_status<S: Store, P: DispatchSink>(
    State(app): State<Arc<App<S, P>>>,
    Query(params): Query<StatusParams>,
) -> Result<Json<TaskStatusOutput>, ApiError> {
    let Some(id) = params.request_id else {
        return Err(ApiError::bad_request("requestID not found"));
    };
    Ok(Json(app.service.get_task_status(&id).await?))
}

#[derive(Debug, serde::Deserialize)]
struct PageParams {
    limit: Option<u64>,
    offset: Option<u64>,
}

async fn task_metadatas<S: Store, P: DispatchSink>(
    State(app): State<Arc<App<S, P>>>,
    Query(params): Query<PageParams>,
) -> Result<Json<TaskMetadataPage>, ApiError> {
    let page = app
        .service
        .get_task_metadatas(params.limit.unwrap_or(10), params.offset.unwrap_or(0))
        .await?;
    Ok(Json(page))
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for err in field_errors.iter() {
            match &err.message {
                Some(message) => parts.push(message.to_string()),
                None => parts.push(format!("{field} is invalid")),
            }
        }
    }
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ObjectIdGenerator, SystemClock};
    use crate::config::TaskConfig;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use models::TaskDispatch;
    use std::time::Duration;
    use tower::ServiceExt;

    struct NullSink;

    impl DispatchSink for NullSink {
        async fn send(&self, _message: &TaskDispatch) -> Result<(), bus::Error> {
            Ok(())
        }
    }

    fn test_router() -> axum::Router {
        let cfg = TaskConfig {
            alphabet: "abc".to_string(),
            chunk_size: 39,
            timeout: Duration::from_secs(3600),
            limit: 0,
            max_age: Duration::from_secs(86400),
            finish_delay: Duration::from_secs(60),
            restart_delay: Duration::from_secs(60),
        };
        let service = CrackService::new(
            cfg,
            MemoryStore::default(),
            Arc::new(NullSink),
            Arc::new(SystemClock),
            Arc::new(ObjectIdGenerator),
        );
        router(Arc::new(App {
            service,
            probes: HealthProbes::default(),
        }))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/hash/crack")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_task_accepts_a_valid_request() {
        let router = test_router();
        let response = router
            .oneshot(post_json(
                r#"{"hash": "acbd18db4cc2f85cedef654fccc4a4d8", "maxLength": 3}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert!(body["requestId"].as_str().unwrap().len() == 24);
    }

    #[tokio::test]
    async fn create_task_rejects_malformed_bodies() {
        for (body, message) in [
            ("", "empty body"),
            ("{not json", "invalid json"),
            (
                r#"{"hash": "nope", "maxLength": 3}"#,
                "hash must be a hex-encoded MD5 digest",
            ),
            (
                r#"{"hash": "acbd18db4cc2f85cedef654fccc4a4d8", "maxLength": 9}"#,
                "maxLength must be between 1 and 6",
            ),
        ] {
            let response = test_router().oneshot(post_json(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");

            let error = body_json(response).await;
            assert_eq!(error["message"], message, "body {body:?}");
            assert_eq!(error["status"], 400);
            assert_eq!(error["path"], "/v1/hash/crack");
        }
    }

    #[tokio::test]
    async fn status_maps_domain_errors() {
        let router = test_router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/hash/crack/status?requestID=0123456789abcdef01234567")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/hash/crack/status?requestID=zzz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/hash/crack/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metadatas_round_trip() {
        let router = test_router();
        let created = router
            .clone()
            .oneshot(post_json(
                r#"{"hash": "acbd18db4cc2f85cedef654fccc4a4d8", "maxLength": 3}"#,
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::ACCEPTED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/hash/crack/metadatas?limit=10&offset=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let page = body_json(response).await;
        assert_eq!(page["count"], 1);
        assert_eq!(page["tasks"][0]["hash"], "acbd18db4cc2f85cedef654fccc4a4d8");
        assert_eq!(page["tasks"][0]["maxLength"], 3);
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let router = test_router();
        for path in [
            "/api/manager/health/liveness",
            "/api/manager/health/readiness",
        ] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "path {path}");
        }
    }
}
