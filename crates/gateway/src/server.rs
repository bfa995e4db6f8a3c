use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, Path, State},
        http::{
            HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
            header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        },
        middleware,
        response::{IntoResponse, Response},
        routing::{any, delete, get},
    },
    serde_json::{Value, json},
    tana_mcp::TanaTool,
    tana_protocol::{MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER, is_initialize_request},
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{AllowOrigin, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{
    auth::require_bearer,
    error::GatewayError,
    session::Session,
    shutdown::{ShutdownCoordinator, wait_for_shutdown_signal},
    state::GatewayState,
    transport::TransportError,
};

/// Largest request body accepted on any route.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ── Server startup ───────────────────────────────────────────────────────────

/// Listener address and teardown timings for [`start_gateway`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub bind: String,
    pub port: u16,
    /// Per-session close bound during shutdown.
    pub close_timeout: Duration,
    /// Bound on the whole session drain.
    pub drain_timeout: Duration,
    /// Time in-flight exchanges get after the drain before the server quits.
    pub shutdown_grace: Duration,
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .route("/mcp", any(mcp_handler))
        .route("/mcp/sessions/{session_id}", delete(close_session_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| {
            // A wildcard cannot be combined with credentials.
            let wildcard = origin.trim() == "*";
            if wildcard {
                warn!("ignoring wildcard CORS origin");
            }
            !wildcard
        })
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            ACCEPT,
            HeaderName::from_static(MCP_SESSION_ID_HEADER),
            HeaderName::from_static(MCP_PROTOCOL_VERSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)])
}

/// Start the gateway and serve until a termination signal has drained every
/// session.
pub async fn start_gateway(state: Arc<GatewayState>, options: ServeOptions) -> anyhow::Result<()> {
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", options.bind, options.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("tana-mcp-server v{}", state.version),
        format!("listening on {addr}"),
        format!("mcp endpoint: http://{addr}/mcp"),
        format!("health check: http://{addr}/health"),
        format!("{} tools registered", TanaTool::ALL.len()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(
        state.registry.clone(),
        options.drain_timeout,
        options.close_timeout,
    );
    let coordinator_token = shutdown.clone();
    tokio::spawn(async move {
        let signal = async {
            if let Err(e) = wait_for_shutdown_signal().await {
                warn!(error = %e, "failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        };
        coordinator.run(signal, coordinator_token).await;
    });

    let serve_token = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_token.cancelled().await })
        .into_future();
    let grace = async {
        shutdown.cancelled().await;
        tokio::time::sleep(options.shutdown_grace).await;
    };

    tokio::select! {
        result = server => result?,
        () = grace => {
            warn!(grace = ?options.shutdown_grace, "in-flight requests still open, exiting anyway");
        },
    }
    info!("server stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "activeSessions": state.registry.len().await,
        "version": state.version,
    }))
}

async fn mcp_handler(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    match serve_mcp(&state, method, &headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve_mcp(
    state: &GatewayState,
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let requested = requested_session_id(headers);
    let (session, created) =
        resolve_or_create(state, requested.as_deref(), &method, &body).await?;

    let mut response = match session.transport.handle(method, headers, body).await {
        Ok(response) => response,
        Err(TransportError::Closed) => {
            debug!(session_id = %session.id, "session closed before it could be served");
            return Err(GatewayError::SessionNotFound);
        },
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "transport failed");
            return Err(GatewayError::Internal(e.to_string()));
        },
    };

    if created && !response.status().is_success() {
        // The initialize exchange was rejected, so the session never started.
        state.registry.evict(&session.id).await;
        if let Err(e) = session.transport.close().await {
            debug!(session_id = %session.id, error = %e, "discarded session close failed");
        }
        return Ok(response);
    }

    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
    }
    Ok(response)
}

/// First `Mcp-Session-Id` value, trimmed. Blank counts as absent.
fn requested_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

async fn resolve_or_create(
    state: &GatewayState,
    requested: Option<&str>,
    method: &Method,
    body: &Bytes,
) -> Result<(Arc<Session>, bool), GatewayError> {
    if let Some(id) = requested
        && let Some(session) = state.registry.resolve(id).await
    {
        return Ok((session, false));
    }

    let initializing = *method == Method::POST && is_initialize_body(body);
    match requested {
        None if initializing => Ok((state.registry.create(None).await?, true)),
        Some(id) if initializing && state.allow_client_session_ids => {
            Ok((state.registry.create(Some(id.to_owned())).await?, true))
        },
        Some(id) => {
            debug!(session_id = %id, "unknown session id");
            Err(GatewayError::SessionNotFound)
        },
        None => Err(GatewayError::MissingSessionId),
    }
}

fn is_initialize_body(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body).is_ok_and(|value| is_initialize_request(&value))
}

async fn close_session_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.registry.evict(&session_id).await else {
        return GatewayError::SessionNotFound.into_response();
    };

    match session.transport.close().await {
        Ok(()) => {
            info!(session_id = %session_id, "session closed by client");
            Json(json!({ "message": format!("Session {session_id} closed") })).into_response()
        },
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "session close failed");
            GatewayError::CloseFailed.into_response()
        },
    }
}
