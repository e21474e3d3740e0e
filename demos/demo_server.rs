use anyhow::Result;
use clap::Parser;
use mcp_http_transport::config::TransportConfig;
use mcp_http_transport::transport::{ServerEvent, ServerHttpTransport};
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TransportConfig::new(cli.host, cli.port);

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let (server, mut events) = ServerHttpTransport::new(config);

    // Minimal echo backend: answer every request with its params, log the rest.
    let backend = server.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::NewSession(session) => {
                    info!(%session, "session opened");
                }
                ServerEvent::Received { session, message } => {
                    let Some(id) = message.get("id").cloned() else {
                        info!(%session, method = ?message.get("method"), "notification");
                        continue;
                    };
                    let reply = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "echo": message.get("params").cloned().unwrap_or(json!({})),
                        },
                    });
                    let _ = backend.send(session, reply);
                }
            }
        }
    });

    server.serve().await
}
