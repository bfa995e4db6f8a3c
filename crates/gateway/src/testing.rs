//! Test doubles for the engine seam.
#![allow(clippy::unwrap_used)]

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::bail,
    async_trait::async_trait,
    serde_json::json,
    tana_mcp::{EngineFactory, Peer, ProtocolEngine},
    tana_protocol::{
        JsonRpcError, JsonRpcResponse, McpNotification, McpRequest, ProgressParams, Request,
    },
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloseBehaviour {
    #[default]
    Succeed,
    Fail,
    Hang,
}

/// Engine that answers every request with its own instance id, so tests can
/// tell which instance served a call.
pub struct RecordingEngine {
    instance_id: Uuid,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    notifications: AtomicUsize,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    stall_calls: bool,
    on_close: CloseBehaviour,
}

/// Counts a tool call for as long as its future is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::with_close(CloseBehaviour::Succeed)
    }
}

impl RecordingEngine {
    pub fn with_close(on_close: CloseBehaviour) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            notifications: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            stall_calls: false,
            on_close,
        }
    }

    /// Tool calls never complete; only cancellation ends them.
    pub fn stalling_calls() -> Self {
        Self {
            stall_calls: true,
            ..Self::default()
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn failing_close() -> Self {
        Self::with_close(CloseBehaviour::Fail)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolEngine for RecordingEngine {
    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn handle_request(&self, request: Request, peer: &Peer) -> JsonRpcResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return JsonRpcResponse::failure(Some(request.id), JsonRpcError::server("engine closed"));
        }
        if let Some(token) = request.meta.progress_token {
            peer.notify_progress(ProgressParams {
                progress_token: token,
                progress: 0.0,
                total: Some(1.0),
                message: None,
            });
        }

        if self.stall_calls && matches!(request.body, McpRequest::CallTool(_)) {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);
            std::future::pending::<()>().await;
        }

        let result = match request.body {
            McpRequest::Initialize(params) => json!({
                "protocolVersion": params.protocol_version,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "recording", "version": "0" },
                "instanceId": self.instance_id.to_string(),
            }),
            McpRequest::Ping => json!({}),
            McpRequest::ListTools { .. } => json!({ "tools": [] }),
            McpRequest::CallTool(params) => json!({
                "content": [{ "type": "text", "text": params.name }],
                "isError": false,
                "instanceId": self.instance_id.to_string(),
            }),
        };
        JsonRpcResponse::success(request.id, result)
    }

    async fn handle_notification(&self, _notification: McpNotification) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        match self.on_close {
            CloseBehaviour::Hang => std::future::pending().await,
            CloseBehaviour::Fail => {
                self.closed.store(true, Ordering::SeqCst);
                bail!("engine refused to close")
            },
            CloseBehaviour::Succeed => {
                if self.closed.swap(true, Ordering::SeqCst) {
                    bail!("engine already closed");
                }
                Ok(())
            },
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    created: AtomicUsize,
    fail: bool,
    on_close: CloseBehaviour,
}

impl RecordingFactory {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            on_close: CloseBehaviour::Hang,
            ..Self::default()
        }
    }

    pub fn failing_close() -> Self {
        Self {
            on_close: CloseBehaviour::Fail,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for RecordingFactory {
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("TANA_API_TOKEN environment variable is required");
        }
        Ok(Arc::new(RecordingEngine::with_close(self.on_close)))
    }
}

/// Poll `check` until it holds, failing the test after about a second.
pub async fn wait_until<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
