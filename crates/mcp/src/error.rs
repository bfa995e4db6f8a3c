use {serde_json::json, tana_api::TanaError, tana_protocol::JsonRpcError, thiserror::Error};

/// Failure of a single `tools/call`. Always recoverable: the session stays
/// open and the client gets a JSON-RPC error object.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tana API call failed: {0}")]
    Downstream(#[from] TanaError),
}

impl ToolError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidArguments(detail.into())
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::UnknownTool(_) | Self::InvalidArguments(_) => {
                JsonRpcError::invalid_params(self)
            },
            Self::Downstream(e) => {
                let err = JsonRpcError::server(self);
                match (e.status(), e.body()) {
                    (None, None) => err,
                    (status, body) => err.with_data(json!({ "status": status, "body": body })),
                }
            },
        }
    }
}
