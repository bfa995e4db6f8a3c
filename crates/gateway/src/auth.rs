use std::sync::Arc;

use {
    axum::{
        extract::{Request, State},
        http::{HeaderMap, header::AUTHORIZATION},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::{error::GatewayError, state::GatewayState};

// ── Types ────────────────────────────────────────────────────────────────────

/// Why a request was rejected. Only ever logged: every variant produces the
/// same 401 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader,
    Malformed,
    WrongScheme,
    EmptyToken,
    Mismatch,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "authorization_missing",
            Self::Malformed => "authorization_malformed",
            Self::WrongScheme => "scheme_not_bearer",
            Self::EmptyToken => "token_empty",
            Self::Mismatch => "token_mismatch",
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    // XOR each byte and accumulate; any difference makes result non-zero.
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Check `Authorization: Bearer <token>` against the server key.
pub fn authorize_bearer(headers: &HeaderMap, expected: &Secret<String>) -> Result<(), AuthFailure> {
    let raw = headers
        .get(AUTHORIZATION)
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::Malformed)?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(AuthFailure::WrongScheme)?;
    if token.is_empty() {
        return Err(AuthFailure::EmptyToken);
    }
    if !safe_equal(token, expected.expose_secret()) {
        return Err(AuthFailure::Mismatch);
    }
    Ok(())
}

/// Middleware guarding the MCP routes. Runs before any session lookup.
pub async fn require_bearer(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    match authorize_bearer(request.headers(), &state.server_key) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            debug!(
                reason = reason.as_str(),
                method = %request.method(),
                path = %request.uri().path(),
                "rejected unauthenticated request"
            );
            GatewayError::Unauthorized.into_response()
        },
    }
}
