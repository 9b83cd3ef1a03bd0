//! Questline - gamified e-learning in the terminal

use anyhow::Context;
use questline::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Rustls 0.23+ needs an explicit crypto provider for HTTPS and WSS
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("crypto provider already installed"))
        .context("Failed to install Rustls crypto provider")?;

    // WARN level by default, use RUST_LOG=info for more
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    cli::run().await
}
