use axum::Json;
use axum::response::IntoResponse;
use http::StatusCode;
use nexus_store::StoreError;

use crate::model::HttpCodes;

/// Errors surfaced to REST callers as `{"message": ...}`.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
    #[error("{message}")]
    Store { status: StatusCode, message: String },
}

fn store_status(err: &StoreError) -> Option<StatusCode> {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) | StoreError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        StoreError::Gone(_) => StatusCode::GONE,
        StoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
        StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::Serialization(_) | StoreError::Backend(_) => return None,
    };
    Some(status)
}

/// Canned message for `status` from a route's response table.
pub fn override_message(codes: Option<&HttpCodes>, status: u16) -> Option<String> {
    codes
        .and_then(|c| c.get(&status))
        .map(|r| r.description.clone())
        .filter(|d| !d.is_empty())
}

impl ApiError {
    /// Maps a store failure to its HTTP status. The route's response table
    /// may supply the message; unclassified failures become a 500 carrying
    /// the raw error.
    pub fn from_store(err: StoreError, codes: Option<&HttpCodes>) -> Self {
        match store_status(&err) {
            Some(status) => ApiError::Store {
                status,
                message: override_message(codes, status.as_u16())
                    .unwrap_or_else(|| err.to_string()),
            },
            None => ApiError::Internal(err.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store { status, .. } => *status,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::from_store(err, None)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }
        (status, Json(serde_json::json!({ "message": self.to_string() })))
            .into_response()
    }
}
