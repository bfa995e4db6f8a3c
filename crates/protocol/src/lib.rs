//! Wire types shared by the gateway and the engine.
//!
//! - `jsonrpc`: JSON-RPC 2.0 envelopes, ids and error objects.
//! - `mcp`: MCP payloads and the tagged unions the transport validates
//!   inbound messages into before anything reaches an engine.

pub mod jsonrpc;
pub mod mcp;

pub use {
    jsonrpc::{
        JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcResponse, RequestId, error_codes,
    },
    mcp::{
        CallToolParams, CallToolResult, ClientMessage, Content, Implementation, InitializeParams,
        InitializeResult, LATEST_PROTOCOL_VERSION, ListToolsResult, McpNotification, McpRequest,
        ProgressParams, Request, RequestMeta, SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities,
        ToolDef, ToolsCapability, is_initialize_request,
    },
};

/// Header carrying the session identifier on requests and responses.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header a client may use to announce the negotiated protocol version.
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
