//! Configuration for the Tana MCP server: schema, file discovery, `${VAR}`
//! substitution and the environment overlay.

pub mod env_overrides;
pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    env_overrides::{apply_env_overrides, apply_env_overrides_with},
    loader::{config_dir, discover_and_load, find_config_file, load, load_config},
    schema::{DEV_SERVER_KEY, ServerConfig, SessionsConfig, TanaConfig, TanaMcpConfig},
};
