use anyhow::Result;
use clap::Parser;
use mcp_http_transport::transport::{ClientEvent, ClientHttpTransport};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the MCP server
    #[arg(default_value = "http://127.0.0.1:3000")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (client, mut events) = ClientHttpTransport::builder(cli.url).build()?;
    client.start().await?;

    // wait for negotiation to settle before sending
    loop {
        match events.recv().await {
            Some(ClientEvent::Started) => break,
            Some(event) => info!(?event, "event before start"),
            None => anyhow::bail!("transport closed before start"),
        }
    }

    client
        .send(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
        .await?;

    match events.recv().await {
        Some(ClientEvent::Received(object)) => info!(%object, "server replied"),
        Some(event) => warn!(?event, "unexpected event"),
        None => warn!("stream closed without a reply"),
    }

    Ok(())
}
