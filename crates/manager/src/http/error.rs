use crate::service::CrackError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An error response in the making: a status code plus the message the
/// uniform error body will carry. The body itself is rendered by the
/// [`error_body`] middleware, which also knows the request path.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// Response extension consumed by [`error_body`].
#[derive(Debug, Clone)]
pub struct ErrorMessage(pub String);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl From<CrackError> for ApiError {
    fn from(err: CrackError) -> Self {
        match &err {
            CrackError::InvalidRequestId | CrackError::Split(_) => {
                Self::bad_request(err.to_string())
            }
            CrackError::TaskNotFound => Self::not_found(err.to_string()),
            CrackError::TooManyTasks => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: err.to_string(),
            },
            _ => {
                tracing::error!(?err, "request failed");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        response.extensions_mut().insert(ErrorMessage(self.message));
        response
    }
}

/// The uniform error body of every failed request.
#[derive(Debug, serde::Serialize)]
pub struct ErrorOutput {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: String,
    pub status: u16,
    pub path: String,
}

/// Middleware turning `ApiError` responses into the uniform error
/// body, which needs the request path that handlers no longer see.
pub async fn error_body(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let Some(ErrorMessage(message)) = response.extensions().get::<ErrorMessage>().cloned() else {
        return response;
    };

    let status = response.status();
    let body = ErrorOutput {
        timestamp: chrono::Utc::now(),
        message,
        status: status.as_u16(),
        path,
    };
    (status, axum::Json(body)).into_response()
}
