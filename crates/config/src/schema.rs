//! Config schema types (server, Tana API, sessions).

use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::warn,
};

/// Key accepted when no server key is configured. Never use it in production.
pub const DEV_SERVER_KEY: &str = "dev-key-change-in-production";

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TanaMcpConfig {
    pub server: ServerConfig,
    pub tana: TanaConfig,
    pub sessions: SessionsConfig,
}

/// HTTP listener and client-facing authentication.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token clients must present on `/mcp`.
    pub server_key: Option<Secret<String>>,
    /// Origins allowed by the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            server_key: None,
            allowed_origins: [
                "https://chatgpt.com",
                "https://chat.openai.com",
                "http://localhost:3000",
                "http://localhost:8080",
                "https://localhost:3000",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ServerConfig {
    /// The configured server key, or [`DEV_SERVER_KEY`] with a warning.
    pub fn server_key_or_dev(&self) -> Secret<String> {
        match &self.server_key {
            Some(key) if !key.expose_secret().is_empty() => {
                Secret::new(key.expose_secret().clone())
            },
            _ => {
                warn!("MCP_SERVER_KEY is not set, using the development key");
                Secret::new(DEV_SERVER_KEY.to_string())
            },
        }
    }
}

/// Downstream Tana input API.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TanaConfig {
    pub api_token: Option<Secret<String>>,
    /// Override the node-creation endpoint.
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Let an initialize request carrying an unknown `Mcp-Session-Id` create
    /// a session under that id instead of answering 404.
    pub allow_client_session_ids: bool,
    /// Interval between SSE keep-alive comments. 0 disables them.
    pub sse_keep_alive_secs: u64,
    pub close_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            allow_client_session_ids: false,
            sse_keep_alive_secs: 15,
            close_timeout_secs: 5,
            drain_timeout_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

impl SessionsConfig {
    pub fn sse_keep_alive(&self) -> Option<Duration> {
        (self.sse_keep_alive_secs > 0).then(|| Duration::from_secs(self.sse_keep_alive_secs))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
