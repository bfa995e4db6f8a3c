//! Gateway: the HTTP front of the MCP server.
//!
//! Lifecycle:
//! 1. Authenticate every `/mcp` request against the server key
//! 2. Resolve the request's session, or create one for an initialize request
//! 3. Hand the exchange to the session's transport, which drives its engine
//! 4. On a termination signal, drain every live session before exiting
//!
//! Protocol logic lives in `tana-mcp`; this crate only bridges HTTP
//! exchanges to long-lived engine instances.

pub mod auth;
pub mod error;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use {
    error::GatewayError,
    server::{ServeOptions, build_gateway_app, start_gateway},
    session::{CloseReport, Session, SessionError, SessionRegistry},
    shutdown::ShutdownCoordinator,
    state::GatewayState,
    transport::{SessionTransport, TransportError},
};
