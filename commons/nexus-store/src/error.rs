#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classifies an API-server status by its reason first and its code
    /// second, the same way the apimachinery `errors.IsXxx` helpers do.
    pub fn from_status(code: u16, reason: &str, message: String) -> Self {
        match reason {
            "NotFound" => return StoreError::NotFound(message),
            "AlreadyExists" => return StoreError::AlreadyExists(message),
            "Conflict" => return StoreError::Conflict(message),
            "Forbidden" => return StoreError::Forbidden(message),
            "Gone" | "Expired" => return StoreError::Gone(message),
            "Invalid" => return StoreError::Invalid(message),
            "BadRequest" => return StoreError::BadRequest(message),
            "InternalError" => return StoreError::Internal(message),
            _ => {}
        }
        match code {
            400 => StoreError::BadRequest(message),
            403 => StoreError::Forbidden(message),
            404 => StoreError::NotFound(message),
            409 => StoreError::Conflict(message),
            410 => StoreError::Gone(message),
            422 => StoreError::Invalid(message),
            500 => StoreError::Internal(message),
            _ => StoreError::Backend(message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
