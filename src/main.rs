use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voice_bridge::{
    create_router, AppState, Collaborators, Config, LocalCollaborators, NatsCollaborators,
    SessionManager,
};

#[derive(Parser)]
#[command(name = "voice-bridge")]
#[command(about = "Real-time voice bridge between callers and a speech engine")]
struct Args {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/voice-bridge")]
    config: String,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voice_bridge=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;

    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Voice Bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Speech engine: {} ({})", cfg.engine.url, cfg.engine.model);

    let collaborators: Arc<dyn Collaborators> = match &cfg.nats.url {
        Some(_) => Arc::new(NatsCollaborators::connect(cfg.nats.clone()).await?),
        None => {
            info!("No NATS url configured; serving assistant '{}' locally", cfg.assistant.name);
            Arc::new(LocalCollaborators::new(cfg.assistant.clone()))
        }
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::new(SessionManager::new(cfg, collaborators));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
