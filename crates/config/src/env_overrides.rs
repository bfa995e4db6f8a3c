//! Environment variables layered over the file config. They always win.

use {anyhow::Context, secrecy::Secret, tracing::debug};

use crate::schema::TanaMcpConfig;

/// Apply `PORT`, `HOST`, `MCP_SERVER_KEY`, `TANA_API_TOKEN`, `TANA_API_URL`,
/// `MCP_ALLOWED_ORIGINS` and `MCP_ALLOW_CLIENT_SESSION_IDS` from the process
/// environment.
pub fn apply_env_overrides(config: &mut TanaMcpConfig) -> anyhow::Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

/// Same as [`apply_env_overrides`] with a caller-supplied lookup. Empty values
/// count as unset.
pub fn apply_env_overrides_with(
    config: &mut TanaMcpConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{port}'"))?;
    }
    if let Some(host) = get("HOST") {
        config.server.bind = host.trim().to_string();
    }
    if let Some(key) = get("MCP_SERVER_KEY") {
        config.server.server_key = Some(Secret::new(key));
    }
    if let Some(origins) = get("MCP_ALLOWED_ORIGINS") {
        config.server.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(token) = get("TANA_API_TOKEN") {
        config.tana.api_token = Some(Secret::new(token));
    }
    if let Some(url) = get("TANA_API_URL") {
        config.tana.api_url = Some(url.trim().to_string());
    }
    if let Some(flag) = get("MCP_ALLOW_CLIENT_SESSION_IDS") {
        config.sessions.allow_client_session_ids = parse_bool(&flag).with_context(|| {
            format!("MCP_ALLOW_CLIENT_SESSION_IDS must be a boolean, got '{flag}'")
        })?;
    }

    debug!(
        bind = %config.server.bind,
        port = config.server.port,
        "applied environment overrides"
    );
    Ok(())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognised boolean '{other}'"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::collections::HashMap};

    fn apply(vars: &[(&str, &str)]) -> anyhow::Result<TanaMcpConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = TanaMcpConfig::default();
        apply_env_overrides_with(&mut config, |name| vars.get(name).cloned())?;
        Ok(config)
    }

    #[test]
    fn overrides_every_field() {
        let cfg = apply(&[
            ("PORT", "8081"),
            ("HOST", "127.0.0.1"),
            ("MCP_SERVER_KEY", "k"),
            ("TANA_API_TOKEN", "t"),
            ("TANA_API_URL", "http://localhost:9999/add"),
            ("MCP_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("MCP_ALLOW_CLIENT_SESSION_IDS", "true"),
        ])
        .unwrap();

        assert_eq!(cfg.server.port, 8081);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.server_key.unwrap().expose_secret(), "k");
        assert_eq!(cfg.tana.api_token.unwrap().expose_secret(), "t");
        assert_eq!(cfg.tana.api_url.as_deref(), Some("http://localhost:9999/add"));
        assert_eq!(cfg.server.allowed_origins, [
            "https://a.example",
            "https://b.example"
        ]);
        assert!(cfg.sessions.allow_client_session_ids);
    }

    #[test]
    fn empty_values_are_ignored() {
        let cfg = apply(&[("PORT", ""), ("MCP_SERVER_KEY", "  ")]).unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert!(cfg.server.server_key.is_none());
    }

    #[test]
    fn invalid_values_are_errors() {
        let err = apply(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = apply(&[("MCP_ALLOW_CLIENT_SESSION_IDS", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("MCP_ALLOW_CLIENT_SESSION_IDS"));
    }
}
