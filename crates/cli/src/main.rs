use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    clap::{Parser, Subcommand},
    tana_api::{DEFAULT_ENDPOINT, TanaClient},
    tana_config::TanaMcpConfig,
    tana_gateway::{GatewayState, ServeOptions, SessionRegistry, start_gateway},
    tana_mcp::{TanaEngineFactory, tools::catalogue},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tana-mcp-server", version, about = "MCP server that creates nodes in Tana")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (the default).
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the tool catalogue as JSON.
    Tools,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None => serve(cli.config.as_deref(), None, None).await,
        Some(Commands::Serve { bind, port }) => serve(cli.config.as_deref(), bind, port).await,
        Some(Commands::Tools) => {
            println!("{}", serde_json::to_string_pretty(&catalogue())?);
            Ok(())
        },
    }
}

async fn serve(config_path: Option<&Path>, bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = tana_config::load(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tana-mcp-server starting");
    let state = build_state(&mut config)?;
    start_gateway(state, ServeOptions {
        bind: config.server.bind.clone(),
        port: config.server.port,
        close_timeout: config.sessions.close_timeout(),
        drain_timeout: config.sessions.drain_timeout(),
        shutdown_grace: config.sessions.shutdown_grace(),
    })
    .await
}

fn build_state(config: &mut TanaMcpConfig) -> anyhow::Result<Arc<GatewayState>> {
    let endpoint = config.tana.api_url.as_deref().unwrap_or(DEFAULT_ENDPOINT);
    let client = TanaClient::new(config.tana.api_token.take(), endpoint)?;
    info!(endpoint = %client.endpoint(), "tana api client ready");

    let factory = Arc::new(TanaEngineFactory::new(Arc::new(client)));
    let registry = SessionRegistry::new(factory, config.sessions.sse_keep_alive());

    Ok(GatewayState::builder(registry, config.server.server_key_or_dev())
        .allow_client_session_ids(config.sessions.allow_client_session_ids)
        .allowed_origins(config.server.allowed_origins.clone())
        .build())
}
