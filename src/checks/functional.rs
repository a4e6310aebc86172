//! Browser-executed functional checks against the live page.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use super::{failed, functional_check_name, outcome, CheckError, PAGE_LOAD_CHECK};
use crate::browser::{is_truthy, BrowserLauncher, BrowserSession};
use crate::llm::truncate_chars;
use crate::store::NewCheckResult;

/// Run `checks` (`(position, expression)`) against `pages_url` in one session.
///
/// The session is opened only when there is something to run, and closed
/// before returning on every path. Checks run once the network is idle and
/// `settle_delay` has passed. A failed page load, or a network that never
/// goes idle within `page_load_timeout`, yields a single "Page load" failure
/// instead of per-check results.
pub async fn run_functional_checks(
    launcher: &dyn BrowserLauncher,
    pages_url: &str,
    checks: &[(usize, &str)],
    page_load_timeout: Duration,
    settle_delay: Duration,
) -> Vec<NewCheckResult> {
    if checks.is_empty() {
        return Vec::new();
    }

    let mut session = match launcher.open().await {
        Ok(session) => session,
        Err(e) => {
            return vec![failed(
                PAGE_LOAD_CHECK,
                &CheckError::Browser(e.to_string()),
            )]
        }
    };

    // Navigation and network idle share the page-load budget.
    let started = Instant::now();
    let loaded = match session.goto(pages_url, page_load_timeout).await {
        Ok(()) => {
            let remaining = page_load_timeout.saturating_sub(started.elapsed());
            session.wait_for_network_idle(remaining).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = loaded {
        tracing::warn!("Page load failed for {}: {}", pages_url, e);
        session.close().await;
        return vec![outcome(
            PAGE_LOAD_CHECK,
            0.0,
            format!("Failed to load page: {}", e),
            pages_url,
        )];
    }

    tokio::time::sleep(settle_delay).await;

    let mut results = Vec::with_capacity(checks.len());
    for (position, expression) in checks {
        let name = functional_check_name(*position);
        let result = run_one(session.as_mut(), &name, expression).await;
        tracing::info!(check = %name, score = result.score, "Functional check finished");
        results.push(result);
    }

    session.close().await;
    results
}

async fn run_one(session: &mut dyn BrowserSession, name: &str, expression: &str) -> NewCheckResult {
    let evaluated = AssertUnwindSafe(session.evaluate(expression))
        .catch_unwind()
        .await;

    match evaluated {
        Ok(Ok(value)) => {
            let passed = is_truthy(&value);
            outcome(
                name,
                if passed { 1.0 } else { 0.0 },
                if passed { "Check passed" } else { "Check failed" },
                format!("{} => {}", truncate_chars(expression, 200), value),
            )
        }
        Ok(Err(e)) => outcome(
            name,
            0.0,
            format!("Error: {}", e),
            truncate_chars(expression, 200),
        ),
        Err(_) => failed(
            name,
            &CheckError::Panicked(format!("evaluating {}", truncate_chars(expression, 80))),
        ),
    }
}
