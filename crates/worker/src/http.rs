use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The worker's HTTP surface is health only.
pub fn router(broker: Option<bus::Connection>) -> axum::Router {
    axum::Router::new()
        .route("/api/worker/health/readiness", get(readiness))
        .route("/api/worker/health/liveness", get(liveness))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(broker)
}

async fn readiness(State(broker): State<Option<bus::Connection>>) -> StatusCode {
    match broker {
        Some(broker) if broker.is_reconnecting() => {
            tracing::warn!("readiness: broker connection is reconnecting");
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::OK,
    }
}

async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoints_respond() {
        let router = router(None);
        for path in [
            "/api/worker/health/liveness",
            "/api/worker/health/readiness",
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
