//! Round 2 dispatch pass over every round-1 submission.

use taskgrade::config::Config;
use taskgrade::dispatch::HttpTransport;
use taskgrade::rounds::{run_round2, RoundSettings};
use taskgrade::store::create_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskgrade::init_tracing("taskgrade=info");

    let config = Config::from_env()?;
    let store = create_store(config.store_backend, config.database_path.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;

    let settings = RoundSettings {
        evaluation_url: config.notify_url(),
        dispatch_timeout: config.grading.dispatch_timeout,
    };
    let summary = run_round2(store.as_ref(), &HttpTransport::new(), &settings).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
