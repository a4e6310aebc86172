//! taskgrade - evaluator HTTP server.
//!
//! Accepts deployment notifications and serves stored results.

use taskgrade::{api, config::Config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskgrade::init_tracing("taskgrade=debug,tower_http=debug");

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?}, database={}",
        config.store_backend,
        config.database_path.display()
    );

    api::serve(config).await?;

    Ok(())
}
