//! Tana MCP engine: the per-session protocol engine and the node-creation
//! tool catalogue it serves.

pub mod engine;
pub mod error;
pub mod tools;

pub use {
    engine::{EngineFactory, Peer, ProtocolEngine, SERVER_NAME, TanaEngine, TanaEngineFactory},
    error::ToolError,
    tools::TanaTool,
};
