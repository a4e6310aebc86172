//! Round 1 dispatch pass.
//!
//! Usage: `round1 <roster.json>`

use std::path::PathBuf;

use taskgrade::config::Config;
use taskgrade::dispatch::HttpTransport;
use taskgrade::rounds::{load_roster, run_round1, RoundSettings};
use taskgrade::store::create_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskgrade::init_tracing("taskgrade=info");

    let roster_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: round1 <roster.json>"))?;

    let config = Config::from_env()?;
    let roster = load_roster(&roster_path)?;
    let store = create_store(config.store_backend, config.database_path.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;

    let settings = RoundSettings {
        evaluation_url: config.notify_url(),
        dispatch_timeout: config.grading.dispatch_timeout,
    };
    let summary = run_round1(store.as_ref(), &HttpTransport::new(), &roster, &settings).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
