/// Error types for the chat server.
/// One taxonomy shared by the store, the live gateway and the REST surface.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage failure: {0}")]
    StoreFailure(#[from] rusqlite::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ChatError {
    /// Stable machine-readable kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "NotFound",
            ChatError::Forbidden(_) => "Forbidden",
            ChatError::InvalidState(_) => "InvalidState",
            ChatError::StoreFailure(_) | ChatError::Encoding(_) => "StoreFailure",
            ChatError::Protocol(_) => "ProtocolError",
            ChatError::Unauthorized(_) => "Unauthorized",
            ChatError::Validation(_) => "ValidationError",
        }
    }

    /// Message safe to show to a client. Storage causes stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::StoreFailure(_) | ChatError::Encoding(_) => {
                "Storage operation failed".to_string()
            }
            ChatError::NotFound(msg)
            | ChatError::Forbidden(msg)
            | ChatError::InvalidState(msg)
            | ChatError::Protocol(msg)
            | ChatError::Unauthorized(msg)
            | ChatError::Validation(msg) => msg.clone(),
        }
    }
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::InvalidState(_) => StatusCode::CONFLICT,
            ChatError::StoreFailure(_) | ChatError::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::Protocol(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, ChatError::StoreFailure(_) | ChatError::Encoding(_)) {
            log::error!("Request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.kind(),
            "message": self.public_message(),
        }))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
