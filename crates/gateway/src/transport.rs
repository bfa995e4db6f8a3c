//! Per-session streamable HTTP transport.
//!
//! Decodes POST bodies into validated protocol messages, runs them through
//! the session's engine and encodes the answers as JSON or SSE. Owns the
//! session's close token: cancelling it (explicitly, or through a drop guard
//! when a client disconnects mid-exchange) tells the registry to evict.

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Json,
        http::{
            HeaderMap, HeaderValue, Method, StatusCode,
            header::{ACCEPT, ALLOW, CONTENT_TYPE},
        },
        response::{
            IntoResponse, Response,
            sse::{Event, KeepAlive, Sse},
        },
    },
    bytes::Bytes,
    futures::Stream,
    serde::Serialize,
    serde_json::Value,
    tana_mcp::{Peer, ProtocolEngine},
    tana_protocol::{ClientMessage, JsonRpcError, JsonRpcNotification, JsonRpcResponse, Request},
    thiserror::Error,
    tokio::{
        sync::{Mutex, mpsc},
        task::{AbortHandle, JoinError},
    },
    tokio_util::sync::{CancellationToken, DropGuard},
    tracing::{debug, warn},
};

const JSON_MIME: &str = "application/json";
const EVENT_STREAM_MIME: &str = "text/event-stream";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("engine error: {0:#}")]
    Engine(anyhow::Error),

    #[error("request task failed: {0}")]
    Task(#[from] JoinError),
}

pub struct SessionTransport {
    session_id: String,
    engine: Arc<dyn ProtocolEngine>,
    close_token: CancellationToken,
    closed: AtomicBool,
    errors: mpsc::UnboundedSender<TransportError>,
    /// Sender half of the standalone GET stream, when one is open.
    standalone: Mutex<Option<mpsc::UnboundedSender<JsonRpcNotification>>>,
    keep_alive: Option<Duration>,
}

/// One slot of a POST body, kept in arrival order.
enum Slot {
    Ready(JsonRpcResponse),
    Pending(Request),
}

impl SessionTransport {
    /// Returns the transport and the receiving end of its error channel.
    pub fn new(
        session_id: String,
        engine: Arc<dyn ProtocolEngine>,
        keep_alive: Option<Duration>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportError>) {
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            session_id,
            engine,
            close_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            errors,
            standalone: Mutex::new(None),
            keep_alive,
        });
        (transport, errors_rx)
    }

    /// Cancelled once the session is over, for whatever reason.
    pub fn close_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.close_token.is_cancelled()
    }

    /// Close the transport and its engine. Only the first call does any work.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.standalone.lock().await.take();
        self.close_token.cancel();
        debug!(session_id = %self.session_id, "transport closed");
        self.engine.close().await.map_err(TransportError::Engine)
    }

    fn report(&self, error: TransportError) {
        // The watcher may already be gone during teardown.
        let _ = self.errors.send(error);
    }

    /// Serve one HTTP exchange for this session.
    pub async fn handle(
        self: &Arc<Self>,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match method {
            Method::POST => self.handle_post(headers, body).await,
            Method::GET => self.handle_get(headers).await,
            Method::DELETE => {
                if let Err(e) = self.close().await {
                    warn!(session_id = %self.session_id, error = %e, "engine close failed");
                    self.report(e);
                }
                Ok(StatusCode::OK.into_response())
            },
            _ => Ok((
                StatusCode::METHOD_NOT_ALLOWED,
                [(ALLOW, HeaderValue::from_static("GET, POST, DELETE, OPTIONS"))],
            )
                .into_response()),
        }
    }

    // ── POST ─────────────────────────────────────────────────────────────────

    async fn handle_post(
        self: &Arc<Self>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, TransportError> {
        let guard = self.close_token.clone().drop_guard();

        if let Some(content_type) = headers.get(CONTENT_TYPE)
            && !content_type
                .to_str()
                .is_ok_and(|ct| ct.trim().to_ascii_lowercase().starts_with(JSON_MIME))
        {
            guard.disarm();
            return Ok(rpc_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                JsonRpcError::server("Unsupported Media Type: Content-Type must be application/json"),
            ));
        }

        let value: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                guard.disarm();
                debug!(session_id = %self.session_id, error = %e, "unparseable request body");
                return Ok(rpc_error(StatusCode::BAD_REQUEST, JsonRpcError::parse_error()));
            },
        };

        let (items, batch) = match value {
            Value::Array(items) if items.is_empty() => {
                guard.disarm();
                return Ok(rpc_error(
                    StatusCode::BAD_REQUEST,
                    JsonRpcError::invalid_request("empty batch"),
                ));
            },
            Value::Array(items) => (items, true),
            single => (vec![single], false),
        };

        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            match ClientMessage::parse(item) {
                Ok(ClientMessage::Request(request)) => slots.push(Slot::Pending(request)),
                Ok(ClientMessage::Notification(notification)) => {
                    self.engine.handle_notification(notification).await;
                },
                Ok(ClientMessage::Response(response)) => {
                    debug!(session_id = %self.session_id, id = ?response.id, "ignoring client response");
                },
                Err(rejection) => slots.push(Slot::Ready(rejection)),
            }
        }

        if slots.is_empty() {
            guard.disarm();
            return Ok(StatusCode::ACCEPTED.into_response());
        }

        if accepts(headers, EVENT_STREAM_MIME) && !accepts(headers, JSON_MIME) {
            return Ok(self.stream_responses(slots, guard));
        }

        let peer = self.standalone_peer().await;
        let responses = run_slots(Arc::clone(&self.engine), slots, peer).await;
        guard.disarm();

        Ok(if batch {
            Json(responses).into_response()
        } else {
            match responses.into_iter().next() {
                Some(response) => Json(response).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        })
    }

    /// Answer over SSE: engine notifications as they happen, then every
    /// response, then end of stream. Dropping the stream early aborts the
    /// requests still running.
    fn stream_responses(
        self: &Arc<Self>,
        slots: Vec<Slot>,
        guard: DropGuard,
    ) -> Response {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut work = tokio::spawn(run_slots(Arc::clone(&self.engine), slots, Peer::new(tx)));
        let abort = AbortOnDrop(work.abort_handle());
        let transport = Arc::clone(self);

        let stream = async_stream::stream! {
            let guard = guard;
            let _abort = abort;
            let joined = loop {
                let step = tokio::select! {
                    Some(note) = rx.recv() => Step::Note(note),
                    joined = &mut work => Step::Done(joined),
                };
                match step {
                    Step::Note(note) => yield sse_event(&note),
                    Step::Done(joined) => break joined,
                }
            };
            while let Ok(note) = rx.try_recv() {
                yield sse_event(&note);
            }
            match joined {
                Ok(responses) => {
                    for response in &responses {
                        yield sse_event(response);
                    }
                },
                Err(e) => {
                    warn!(session_id = %transport.session_id, error = %e, "request task failed");
                    transport.report(TransportError::Task(e));
                },
            }
            guard.disarm();
        };

        sse_response(stream, self.keep_alive)
    }

    // ── GET ──────────────────────────────────────────────────────────────────

    async fn handle_get(self: &Arc<Self>, headers: &HeaderMap) -> Result<Response, TransportError> {
        if !accepts(headers, EVENT_STREAM_MIME) {
            return Ok(rpc_error(
                StatusCode::NOT_ACCEPTABLE,
                JsonRpcError::server("Not Acceptable: Client must accept text/event-stream"),
            ));
        }

        let mut rx = {
            let mut slot = self.standalone.lock().await;
            if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Ok(rpc_error(
                    StatusCode::CONFLICT,
                    JsonRpcError::server("Conflict: Only one SSE stream is allowed per session"),
                ));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *slot = Some(tx);
            rx
        };
        debug!(session_id = %self.session_id, "standalone SSE stream opened");

        let guard = self.close_token.clone().drop_guard();
        let closed = self.close_token.clone();
        let stream = async_stream::stream! {
            let guard = guard;
            loop {
                let next = tokio::select! {
                    note = rx.recv() => note,
                    () = closed.cancelled() => None,
                };
                match next {
                    Some(note) => yield sse_event(&note),
                    None => break,
                }
            }
            guard.disarm();
        };

        Ok(sse_response(stream, self.keep_alive))
    }

    /// Peer for requests answered as plain JSON: notifications go to the
    /// standalone stream if one is open.
    async fn standalone_peer(&self) -> Peer {
        match self.standalone.lock().await.as_ref() {
            Some(tx) if !tx.is_closed() => Peer::new(tx.clone()),
            _ => Peer::detached(),
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Step {
    Note(JsonRpcNotification),
    Done(Result<Vec<JsonRpcResponse>, JoinError>),
}

async fn run_slots(
    engine: Arc<dyn ProtocolEngine>,
    slots: Vec<Slot>,
    peer: Peer,
) -> Vec<JsonRpcResponse> {
    let mut responses = Vec::with_capacity(slots.len());
    for slot in slots {
        responses.push(match slot {
            Slot::Ready(response) => response,
            Slot::Pending(request) => engine.handle_request(request, &peer).await,
        });
    }
    responses
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::failure(None, error))).into_response()
}

fn sse_event<T: Serialize>(message: &T) -> Result<Event, Infallible> {
    Ok(match serde_json::to_string(message) {
        Ok(data) => Event::default().event("message").data(data),
        Err(e) => {
            warn!(error = %e, "failed to encode SSE message");
            Event::default().comment("encoding error")
        },
    })
}

fn sse_response<S>(stream: S, keep_alive: Option<Duration>) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let sse = Sse::new(stream);
    match keep_alive {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response(),
        None => sse.into_response(),
    }
}

/// True when any `Accept` value names `mime` exactly.
fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|part| part.split(';').next())
        .any(|m| m.trim().eq_ignore_ascii_case(mime))
}
