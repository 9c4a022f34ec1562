use anyhow::Context;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::info;

use petri_server::{Api, AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Wager-backed arena match server")]
struct Args {
    /// Host interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = ServerConfig::from_env()?;
    info!(
        db = %config.db_path,
        tick_rate = config.tick_rate,
        map_radius = config.map_radius,
        "starting petri server"
    );

    let state = AppState::new(config).context("failed to open state")?;

    // Any match persisted but never closed by a previous process gets its
    // escrow refunded before we accept traffic.
    let refunded = state.controller.recover().context("recovery failed")?;
    if refunded > 0 {
        info!(refunded, "recovery refunded unfinished matches");
    }

    let _sweeper = state.controller.start_sweeper();

    let api = Api::new(Arc::clone(&state));
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received; aborting live matches");
            shutdown_state.controller.shutdown().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
