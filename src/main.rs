use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use glasshub::{create_router, spawn_stt_task, AppState, Config, NatsClient, SessionHub};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "glasshub", about = "Cloud relay between smart glasses clients and TPAs")]
struct Args {
    /// Path to the config file, without extension
    #[arg(long, default_value = "config/glasshub")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);
    info!("{} registered apps", cfg.apps.len());

    let nats = match &cfg.nats {
        Some(nats_cfg) => Some(Arc::new(NatsClient::connect(&nats_cfg.url).await?)),
        None => {
            warn!("No NATS configured; transcription streams are disabled");
            None
        }
    };

    let hub = Arc::new(SessionHub::new(
        cfg.hub_config(),
        cfg.apps.clone(),
        nats.clone(),
    ));

    if let Some(nats) = nats {
        spawn_stt_task(Arc::clone(&hub), nats);
    }

    let app = create_router(AppState::new(hub));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
