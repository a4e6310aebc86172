//! Reference submitter: `POST /api/deploy` builds, publishes and notifies.

use taskgrade::{config::Config, student};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskgrade::init_tracing("taskgrade=debug,tower_http=debug");

    let config = Config::from_env()?;
    if config.student_secret.is_none() {
        tracing::warn!("STUDENT_SECRET is not set; every deploy request will be rejected");
    }

    student::serve(config).await
}
