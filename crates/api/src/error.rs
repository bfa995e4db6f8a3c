use thiserror::Error;

#[derive(Debug, Error)]
pub enum TanaError {
    #[error("TANA_API_TOKEN environment variable is required")]
    MissingToken,

    #[error("invalid Tana API endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("request to Tana API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tana API returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl TanaError {
    /// HTTP status reported by the API, when it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response body returned alongside a non-success status.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}
