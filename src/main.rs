//! Call records server - Entry point
//!
//! MCP server that turns telecom call-detail statements into queryable tables.

use call_records_server::{run_server_with_config, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (stdout carries the MCP transport)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_records_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        resource_dirs = config.resource_dirs.len(),
        skip_policy = ?config.skip_policy,
        "Starting call records server"
    );

    run_server_with_config(config).await
}
