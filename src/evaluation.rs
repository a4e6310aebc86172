//! Batch evaluation of every stored submission, one at a time.

use serde::Serialize;

use crate::checks::{CheckRunner, EvaluationOutcome};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Evaluate all submissions in insertion order, skipping those already scored.
///
/// A failure on one submission is logged and does not stop the batch.
pub async fn evaluate_all(
    store: &dyn Store,
    runner: &CheckRunner,
) -> Result<EvaluationSummary, String> {
    let submissions = store.list_submissions(None).await?;
    tracing::info!("Evaluating {} submissions", submissions.len());

    let mut summary = EvaluationSummary::default();
    for submission in &submissions {
        tracing::info!("Evaluating {}", submission.key());
        match runner.evaluate(store, submission).await {
            Ok(EvaluationOutcome::Evaluated { results, aggregate }) => {
                let total: f64 = results.iter().map(|r| r.score).sum();
                tracing::info!(
                    "{}: {:.2}/{} ({:.1}%)",
                    submission.key(),
                    total,
                    results.len(),
                    aggregate * 100.0
                );
                summary.evaluated += 1;
            }
            Ok(EvaluationOutcome::AlreadyEvaluated) => summary.skipped += 1,
            Err(e) => {
                tracing::error!("Failed to evaluate {}: {}", submission.key(), e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(?summary, "Evaluation complete");
    Ok(summary)
}
