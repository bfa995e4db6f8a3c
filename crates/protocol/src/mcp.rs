//! MCP payload types and the inbound message tagged unions.
//!
//! Inbound JSON is validated exactly once, at the transport boundary, through
//! [`ClientMessage::parse`]. Anything the engine receives is already one of
//! the recognised shapes; everything else has been turned into a JSON-RPC
//! error response carrying the offending request id when one was readable.

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
};

use crate::jsonrpc::{JSONRPC_VERSION, JsonRpcError, JsonRpcResponse, RequestId};

/// Newest protocol revision this server speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every revision accepted during version negotiation, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
            structured_content: None,
        }
    }
}

/// Params of `notifications/progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: Value,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Inbound tagged unions ────────────────────────────────────────────────────

/// `_meta` carried inside request params.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    pub progress_token: Option<Value>,
}

/// The request vocabulary the engine understands.
#[derive(Debug, Clone)]
pub enum McpRequest {
    Initialize(InitializeParams),
    ListTools { cursor: Option<String> },
    CallTool(CallToolParams),
    Ping,
}

impl McpRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::ListTools { .. } => "tools/list",
            Self::CallTool(_) => "tools/call",
            Self::Ping => "ping",
        }
    }
}

/// A validated request: id, `_meta` and a typed body.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub meta: RequestMeta,
    pub body: McpRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum McpNotification {
    Initialized,
    Cancelled {
        request_id: Option<RequestId>,
        reason: Option<String>,
    },
    Other {
        method: String,
    },
}

/// Any single message a client may send.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Request(Request),
    Notification(McpNotification),
    Response(JsonRpcResponse),
}

impl ClientMessage {
    /// Validate one JSON value into a typed message.
    ///
    /// On failure the returned response is ready to send back; it is only
    /// meaningful when the input looked like a request.
    pub fn parse(value: Value) -> Result<Self, JsonRpcResponse> {
        let Value::Object(mut obj) = value else {
            return Err(JsonRpcResponse::failure(
                None,
                JsonRpcError::invalid_request("expected a JSON object"),
            ));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => match serde_json::from_value::<RequestId>(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    return Err(JsonRpcResponse::failure(
                        None,
                        JsonRpcError::invalid_request("id must be a string or an integer"),
                    ));
                },
            },
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        let params = obj.remove("params");
        match (obj.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => {
                Request::parse(id, &method, params).map(Self::Request)
            },
            (Some(Value::String(method)), None) => Ok(Self::Notification(
                McpNotification::parse(&method, params.as_ref()),
            )),
            (Some(_), id) => Err(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("method must be a string"),
            )),
            (None, id) => parse_response(id, obj),
        }
    }
}

impl Request {
    fn parse(id: RequestId, method: &str, params: Option<Value>) -> Result<Self, JsonRpcResponse> {
        let meta = params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .map(|m| RequestMeta {
                progress_token: m.get("progressToken").cloned(),
            })
            .unwrap_or_default();

        let body = match method {
            "initialize" => McpRequest::Initialize(decode_params(&id, params)?),
            "tools/list" => McpRequest::ListTools {
                cursor: params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            "tools/call" => McpRequest::CallTool(decode_params(&id, params)?),
            "ping" => McpRequest::Ping,
            other => {
                return Err(JsonRpcResponse::failure(
                    Some(id),
                    JsonRpcError::method_not_found(other),
                ));
            },
        };

        Ok(Self { id, meta, body })
    }
}

impl McpNotification {
    fn parse(method: &str, params: Option<&Value>) -> Self {
        match method {
            "notifications/initialized" => Self::Initialized,
            "notifications/cancelled" => Self::Cancelled {
                request_id: params
                    .and_then(|p| p.get("requestId"))
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
                reason: params
                    .and_then(|p| p.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            other => Self::Other {
                method: other.to_string(),
            },
        }
    }
}

fn decode_params<T: DeserializeOwned>(
    id: &RequestId,
    params: Option<Value>,
) -> Result<T, JsonRpcResponse> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        JsonRpcResponse::failure(
            Some(id.clone()),
            JsonRpcError::invalid_params(format!("Invalid params: {e}")),
        )
    })
}

fn parse_response(
    id: Option<RequestId>,
    mut obj: Map<String, Value>,
) -> Result<ClientMessage, JsonRpcResponse> {
    let result = obj.remove("result");
    let error = match obj.remove("error") {
        Some(raw) => Some(serde_json::from_value::<JsonRpcError>(raw).map_err(|e| {
            JsonRpcResponse::failure(id.clone(), JsonRpcError::invalid_request(e))
        })?),
        None => None,
    };
    if result.is_none() && error.is_none() {
        return Err(JsonRpcResponse::failure(
            id,
            JsonRpcError::invalid_request("missing method, result or error"),
        ));
    }
    Ok(ClientMessage::Response(JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.into(),
        id,
        result,
        error,
    }))
}

/// True when `value` is a single, well-formed `initialize` request.
pub fn is_initialize_request(value: &Value) -> bool {
    if value.get("method").and_then(Value::as_str) != Some("initialize") {
        return false;
    }
    matches!(
        ClientMessage::parse(value.clone()),
        Ok(ClientMessage::Request(Request {
            body: McpRequest::Initialize(_),
            ..
        }))
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::jsonrpc::error_codes, serde_json::json};

    fn initialize_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }
        })
    }

    #[test]
    fn recognises_initialize() {
        assert!(is_initialize_request(&initialize_body()));
    }

    #[test]
    fn initialize_without_client_info_is_not_initialization() {
        let mut body = initialize_body();
        body["params"].as_object_mut().unwrap().remove("clientInfo");
        assert!(!is_initialize_request(&body));

        match ClientMessage::parse(body) {
            Err(resp) => {
                assert_eq!(resp.id, Some(RequestId::Number(1)));
                assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
            },
            Ok(other) => panic!("expected invalid params, got {other:?}"),
        }
    }

    #[test]
    fn batches_and_other_methods_are_not_initialization() {
        assert!(!is_initialize_request(&json!([initialize_body()])));
        assert!(!is_initialize_request(
            &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })
        ));
        assert!(!is_initialize_request(&json!("initialize")));
    }

    #[test]
    fn parses_tool_call_with_progress_token() {
        let msg = ClientMessage::parse(json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": {
                "name": "create_plain_node",
                "arguments": { "name": "Test" },
                "_meta": { "progressToken": 42 }
            }
        }))
        .unwrap();

        let ClientMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::String("call-1".into()));
        assert_eq!(req.meta.progress_token, Some(json!(42)));
        match req.body {
            McpRequest::CallTool(params) => {
                assert_eq!(params.name, "create_plain_node");
                assert_eq!(params.arguments.unwrap()["name"], "Test");
            },
            other => panic!("expected tools/call, got {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_rejected_with_its_id() {
        let err = ClientMessage::parse(json!({
            "jsonrpc": "2.0", "id": 9, "method": "resources/list"
        }))
        .unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(9)));
        assert_eq!(err.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = ClientMessage::parse(json!({ "jsonrpc": "1.0", "id": 3, "method": "ping" }))
            .unwrap_err();
        assert_eq!(err.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn notifications_and_responses() {
        let init = ClientMessage::parse(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(matches!(
            init,
            ClientMessage::Notification(McpNotification::Initialized)
        ));

        let cancelled = ClientMessage::parse(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 4, "reason": "user abort" }
        }))
        .unwrap();
        match cancelled {
            ClientMessage::Notification(McpNotification::Cancelled { request_id, reason }) => {
                assert_eq!(request_id, Some(RequestId::Number(4)));
                assert_eq!(reason.as_deref(), Some("user abort"));
            },
            other => panic!("expected cancelled, got {other:?}"),
        }

        let response = ClientMessage::parse(json!({ "jsonrpc": "2.0", "id": 5, "result": {} }))
            .unwrap();
        assert!(matches!(response, ClientMessage::Response(_)));

        let empty = ClientMessage::parse(json!({ "jsonrpc": "2.0", "id": 5 })).unwrap_err();
        assert_eq!(empty.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn tool_result_shape() {
        let value = serde_json::to_value(CallToolResult::text("done")).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "done");
        assert_eq!(value["isError"], false);
    }
}
