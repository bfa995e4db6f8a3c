use {
    axum::{
        Json,
        http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
        response::{IntoResponse, Response},
    },
    serde_json::json,
    thiserror::Error,
};

use crate::session::SessionError;

/// Failures the router answers with a plain HTTP error instead of a
/// JSON-RPC envelope.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Mcp-Session-Id header is required after initialization")]
    MissingSessionId,

    #[error("Session already exists")]
    SessionExists,

    #[error("Failed to close session")]
    CloseFailed,

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::MissingSessionId => StatusCode::BAD_REQUEST,
            Self::SessionExists => StatusCode::CONFLICT,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::CloseFailed | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyExists(_) => Self::SessionExists,
            SessionError::Engine(e) => Self::Internal(format!("{e:#}")),
            SessionError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Internal(message) => json!({ "error": self.to_string(), "message": message }),
            _ => json!({ "error": self.to_string() }),
        };
        let mut response = (self.status(), Json(body)).into_response();
        if matches!(self, Self::Unauthorized) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
