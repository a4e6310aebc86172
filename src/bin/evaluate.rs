//! Evaluate every submission that has no results yet.

use taskgrade::checks::CheckRunner;
use taskgrade::config::Config;
use taskgrade::evaluation::evaluate_all;
use taskgrade::store::create_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskgrade::init_tracing("taskgrade=info");

    let config = Config::from_env()?;
    let store = create_store(config.store_backend, config.database_path.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    let runner = CheckRunner::from_config(&config)?;

    let summary = evaluate_all(store.as_ref(), &runner)
        .await
        .map_err(|e| anyhow::anyhow!("Evaluation failed: {}", e))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
