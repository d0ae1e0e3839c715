use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use extract_core::error::ExtractError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 404 errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 404 through the `anyhow::Error` chain for
/// lookups that have no `ExtractError` variant.
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ExtractError::InvalidParameter(msg.into()).into())
    }

    /// Construct a 404 Not Found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub(crate) fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }
}

fn status_of(e: &ExtractError) -> StatusCode {
    match e {
        ExtractError::NotInitialized => StatusCode::BAD_REQUEST,
        ExtractError::RequestNotFound(_)
        | ExtractError::ConnectorNotFound(_)
        | ExtractError::ProcessNotFound(_)
        | ExtractError::TaskNotFound(_)
        | ExtractError::RuleNotFound(_)
        | ExtractError::UserNotFound(_)
        | ExtractError::GroupNotFound(_)
        | ExtractError::RemarkNotFound(_)
        | ExtractError::PluginNotFound(_) => StatusCode::NOT_FOUND,
        ExtractError::UserExists(_)
        | ExtractError::ProcessInUse(_)
        | ExtractError::ConnectorInUse(_)
        | ExtractError::RequestBusy(_) => StatusCode::CONFLICT,
        ExtractError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExtractError::InvalidStatus(_)
        | ExtractError::InvalidProfile(_)
        | ExtractError::InvalidMode(_)
        | ExtractError::InvalidLogin(_)
        | ExtractError::InvalidRule(_)
        | ExtractError::InvalidGeometry(_)
        | ExtractError::InvalidTimeRange(_)
        | ExtractError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        ExtractError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ExtractError::HistoryDb(_)
        | ExtractError::Io(_)
        | ExtractError::Yaml(_)
        | ExtractError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(n) = self.0.downcast_ref::<NotFoundError>() {
            let body = serde_json::json!({ "error": n.0.clone() });
            return (StatusCode::NOT_FOUND, axum::Json(body)).into_response();
        }

        let status = match self.0.downcast_ref::<ExtractError>() {
            Some(e) => status_of(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
