//! nos local relay
//!
//! An in-memory relay for trying `nos` without touching public relays.
//! The server provides:
//! - Signature-checked event storage
//! - Subscriptions with stored results, end-of-stored-events and live events
//!
//! Usage:
//!   nos-relay [--port 7777] [--host 127.0.0.1]
//!
//! Then point nos at it:
//!   nos relay add ws://127.0.0.1:7777

use clap::Parser;
use nos::server::RelayServer;
use tokio::net::TcpListener;
use tracing::info;

/// nos local relay
#[derive(Parser)]
#[command(name = "nos-relay")]
#[command(about = "In-memory relay for testing nos locally")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nos_relay=info".parse()?)
                .add_directive("nos=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&addr).await?;
    info!("nos relay listening on ws://{}", addr);
    info!("Events are kept in memory only");

    RelayServer::new().serve(listener).await;
    Ok(())
}
