//! Protocol engine contract and the Tana implementation of it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    anyhow::bail,
    async_trait::async_trait,
    serde::Serialize,
    serde_json::json,
    tana_api::TanaClient,
    tana_protocol::{
        CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
        JsonRpcError, JsonRpcNotification, JsonRpcResponse, LATEST_PROTOCOL_VERSION,
        ListToolsResult, McpNotification, McpRequest, ProgressParams, Request, RequestId,
        RequestMeta, SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, ToolsCapability,
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{error::ToolError, tools};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "tana-mcp-server";

const INSTRUCTIONS: &str = "Creates nodes in Tana. Use create_plain_node for text, \
                            create_reference_node to link an existing node, create_date_node \
                            for dates and create_url_node for links.";

// ── Contract ─────────────────────────────────────────────────────────────────

/// Per-request handle for server-originated notifications.
///
/// The transport decides where they go: the POST's own SSE stream, the
/// session's standalone GET stream, or nowhere.
#[derive(Clone, Debug, Default)]
pub struct Peer {
    tx: Option<mpsc::UnboundedSender<JsonRpcNotification>>,
}

impl Peer {
    pub fn new(tx: mpsc::UnboundedSender<JsonRpcNotification>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A peer that discards everything sent to it.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Returns false when nobody is listening any more.
    pub fn notify(&self, notification: JsonRpcNotification) -> bool {
        match &self.tx {
            Some(tx) => tx.send(notification).is_ok(),
            None => false,
        }
    }

    pub fn notify_progress(&self, params: ProgressParams) -> bool {
        match serde_json::to_value(params) {
            Ok(params) => self.notify(JsonRpcNotification::new(
                "notifications/progress",
                Some(params),
            )),
            Err(e) => {
                warn!(error = %e, "failed to encode progress notification");
                false
            },
        }
    }
}

/// One live protocol engine per session.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Stable for the lifetime of the engine; used to tell instances apart.
    fn instance_id(&self) -> Uuid;

    /// Never fails at the HTTP level: every error is a JSON-RPC error object.
    async fn handle_request(&self, request: Request, peer: &Peer) -> JsonRpcResponse;

    async fn handle_notification(&self, notification: McpNotification);

    /// Release the engine. A second call is an error.
    async fn close(&self) -> anyhow::Result<()>;

    fn is_closed(&self) -> bool;
}

/// Builds a fresh engine for each new session.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>>;
}

// ── Tana engine ──────────────────────────────────────────────────────────────

pub struct TanaEngine {
    instance_id: Uuid,
    client: Arc<TanaClient>,
    initialized: AtomicBool,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl TanaEngine {
    pub fn new(client: Arc<TanaClient>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            client,
            initialized: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// True once the client has sent `notifications/initialized`.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn initialize(&self, id: RequestId, params: InitializeParams) -> JsonRpcResponse {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::invalid_request("session already initialized"),
            );
        }

        let protocol_version = negotiate_version(&params.protocol_version);
        info!(
            instance_id = %self.instance_id,
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            protocol_version,
            "MCP session initialized"
        );

        respond(id, &InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        })
    }

    async fn call_tool(
        &self,
        id: RequestId,
        meta: &RequestMeta,
        params: CallToolParams,
        peer: &Peer,
    ) -> JsonRpcResponse {
        match self.run_tool(meta, params, peer).await {
            Ok(result) => respond(id, &result),
            Err(e) => {
                warn!(instance_id = %self.instance_id, error = %e, "tool call failed");
                JsonRpcResponse::failure(Some(id), e.to_rpc_error())
            },
        }
    }

    async fn run_tool(
        &self,
        meta: &RequestMeta,
        params: CallToolParams,
        peer: &Peer,
    ) -> Result<CallToolResult, ToolError> {
        let tool = tools::TanaTool::from_name(&params.name)
            .ok_or_else(|| ToolError::UnknownTool(params.name.clone()))?;
        let node = tool.parse_arguments(params.arguments)?;

        if let Some(token) = &meta.progress_token {
            peer.notify_progress(ProgressParams {
                progress_token: token.clone(),
                progress: 0.0,
                total: Some(1.0),
                message: Some(format!("Creating {} node", node.kind())),
            });
        }

        debug!(instance_id = %self.instance_id, tool = tool.name(), "calling Tana API");
        let data = self.client.create_node(&node).await?;
        info!(instance_id = %self.instance_id, tool = tool.name(), "node created");

        let payload = json!({ "success": true, "data": data });
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        Ok(CallToolResult::text(text))
    }
}

#[async_trait]
impl ProtocolEngine for TanaEngine {
    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn handle_request(&self, request: Request, peer: &Peer) -> JsonRpcResponse {
        let Request { id, meta, body } = request;
        if self.is_closed() {
            return JsonRpcResponse::failure(Some(id), JsonRpcError::server("engine closed"));
        }

        debug!(
            instance_id = %self.instance_id,
            method = body.method(),
            id = %id,
            "handling request"
        );
        match body {
            McpRequest::Initialize(params) => self.initialize(id, params),
            McpRequest::Ping => JsonRpcResponse::success(id, json!({})),
            McpRequest::ListTools { .. } => respond(id, &ListToolsResult {
                tools: tools::catalogue(),
                next_cursor: None,
            }),
            McpRequest::CallTool(params) => self.call_tool(id, &meta, params, peer).await,
        }
    }

    async fn handle_notification(&self, notification: McpNotification) {
        match notification {
            McpNotification::Initialized => {
                self.ready.store(true, Ordering::SeqCst);
                debug!(instance_id = %self.instance_id, "client ready");
            },
            McpNotification::Cancelled { request_id, reason } => {
                info!(
                    instance_id = %self.instance_id,
                    request_id = ?request_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "client cancelled request"
                );
            },
            McpNotification::Other { method } => {
                debug!(instance_id = %self.instance_id, method = %method, "ignoring notification");
            },
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            bail!("engine already closed");
        }
        debug!(instance_id = %self.instance_id, "engine closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands every session its own [`TanaEngine`] over one shared client.
pub struct TanaEngineFactory {
    client: Arc<TanaClient>,
}

impl TanaEngineFactory {
    pub fn new(client: Arc<TanaClient>) -> Self {
        Self { client }
    }
}

impl EngineFactory for TanaEngineFactory {
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>> {
        Ok(Arc::new(TanaEngine::new(Arc::clone(&self.client))))
    }
}

fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

fn respond<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::failure(Some(id), JsonRpcError::internal(e)),
    }
}
