use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    logger::init(&args.log);

    log::info!("jetgate {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load(config::LoadOptions {
        models_path: args.models_path,
        stats_path: args.stats_path,
        port: args.port,
    })?;

    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown signal received, draining requests");
                shutdown.cancel();
            }
        }
    });

    let app = llm::router(&config, shutdown.clone()).await?;

    let listen_address = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind {listen_address}"))?;

    log::info!("listening on {listen_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("server error")?;

    // Let the statistics persister land its final snapshot.
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(250)).await;

    log::info!("goodbye");
    Ok(())
}
