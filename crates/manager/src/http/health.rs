use super::App;
use crate::service::DispatchSink;
use crate::store::Store;
use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Ready iff the document store answers a ping and the broker
/// connection is not mid-recovery.
pub async fn readiness<S: Store, P: DispatchSink>(
    State(app): State<Arc<App<S, P>>>,
) -> StatusCode {
    if let Some(mongo) = &app.probes.mongo {
        if let Err(err) = mongo.ping(PING_TIMEOUT).await {
            tracing::warn!(?err, "readiness: MongoDB ping failed");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    if let Some(broker) = &app.probes.broker {
        if broker.is_reconnecting() {
            tracing::warn!("readiness: broker connection is reconnecting");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
