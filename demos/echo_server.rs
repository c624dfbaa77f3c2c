//! WebSocket echo server with admission control enabled.
//!
//! Run with: `RUST_LOG=wsgate=debug cargo run --example echo_server`
//! Stop with Ctrl-C; open connections receive close code 1001.

use std::error::Error;

use tracing_subscriber::EnvFilter;
use wsgate::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::default()
        .with_bind_address("127.0.0.1")
        .with_port(9001)
        .with_security(true)
        .with_max_connections_per_ip(3);
    let mut server = Server::with_config(config);

    server.on_connect(|ip| tracing::info!(client_ip = ip, "client connected"))?;
    server.on_message(|_ip, text| Some(format!("Echo: {text}")))?;
    server.on_binary(|_ip, data| Some(data.to_vec()))?;
    server.on_disconnect(|ip| tracing::info!(client_ip = ip, "client disconnected"))?;
    server.on_error(|ip, e| tracing::warn!(client_ip = ip, kind = ?e.kind(), error = %e, "connection error"))?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
