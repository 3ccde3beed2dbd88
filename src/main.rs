use anyhow::Context;
use citerag::{api, config, logging, pipeline::RetrievalService};
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_PORT: u16 = 8080;

/// Citation RAG HTTP server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Port to listen on; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
    /// Dotenv file to load before reading the environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing();
    let config = config::init_config(args.env_file.as_deref())?;

    let service = RetrievalService::new()
        .await
        .context("Failed to initialize retrieval service")?;
    let app = api::create_router(Arc::new(service));

    let port = args.port.or(config.server_port).unwrap_or(DEFAULT_PORT);
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
