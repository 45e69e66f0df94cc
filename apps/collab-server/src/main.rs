//! Shared-document WebSocket server

use clap::Parser;
use collaboration::Hub;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "collab-server")]
#[command(about = "Hosts shared notes for real-time collaboration")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "COLLAB_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Drop collaborators silent for this many seconds (0 disables)
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("collab_server=debug,collaboration=debug")
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).await?;
    info!("Collaboration server listening on: {}", listener.local_addr()?);

    let hub = Hub::new();
    if args.idle_timeout_secs > 0 {
        tokio::spawn(collab_server::evict_idle_loop(
            hub.clone(),
            Duration::from_secs(args.idle_timeout_secs),
        ));
    }

    collab_server::serve(listener, hub).await
}
