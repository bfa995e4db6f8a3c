//! Client for the Tana input API: the single downstream endpoint every node
//! creation tool ends up calling.

pub mod client;
pub mod error;
pub mod node;

pub use {
    client::{DEFAULT_ENDPOINT, TanaClient},
    error::TanaError,
    node::{NodeKind, NodeRequest, Supertag},
};
