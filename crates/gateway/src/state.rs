use {secrecy::Secret, std::sync::Arc};

use crate::session::SessionRegistry;

/// Shared state behind every route.
pub struct GatewayState {
    pub registry: SessionRegistry,
    /// Bearer token clients must present.
    pub server_key: Secret<String>,
    /// Honour unknown client-chosen session ids on initialization.
    pub allow_client_session_ids: bool,
    pub allowed_origins: Vec<String>,
    pub version: String,
}

impl GatewayState {
    pub fn new(registry: SessionRegistry, server_key: Secret<String>) -> Arc<Self> {
        Self::builder(registry, server_key).build()
    }

    pub fn builder(registry: SessionRegistry, server_key: Secret<String>) -> GatewayStateBuilder {
        GatewayStateBuilder {
            state: Self {
                registry,
                server_key,
                allow_client_session_ids: false,
                allowed_origins: Vec::new(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

pub struct GatewayStateBuilder {
    state: GatewayState,
}

impl GatewayStateBuilder {
    pub fn allow_client_session_ids(mut self, allow: bool) -> Self {
        self.state.allow_client_session_ids = allow;
        self
    }

    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.state.allowed_origins = origins;
        self
    }

    pub fn build(self) -> Arc<GatewayState> {
        Arc::new(self.state)
    }
}
