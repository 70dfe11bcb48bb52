use std::sync::Arc;

use rchat::relay::config::RelayConfig;
use rchat::relay::directory::MemoryDirectory;
use rchat::relay::server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("rchat relay starting");

    let config = RelayConfig::from_env()?;
    if let Some(ttl) = config.session_policy.ttl {
        info!("sessions expire after {}s", ttl.as_secs());
    }

    // Accounts live in memory only; seeded ones let federation peers log in.
    let directory = Arc::new(MemoryDirectory::with_accounts(config.accounts.clone()));
    if !config.accounts.is_empty() {
        info!(count = config.accounts.len(), "seeded accounts");
    }

    server::run(directory, config).await
}
