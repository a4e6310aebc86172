//! Runs the full check pipeline for a submission and records it once.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::functional::run_functional_checks;
use super::license::check_license;
use super::quality::{check_code, check_readme, check_rubric};
use super::timing::check_timing;
use super::{
    aggregate_score, failed, rubric_check_name, CheckError, CODE_CHECK, LICENSE_CHECK,
    README_CHECK, TIMING_CHECK,
};
use crate::browser::{BrowserLauncher, ChromiumLauncher};
use crate::config::{Config, GradingConfig};
use crate::llm::{ChatCompletionsClient, LlmGrader, QualitativeGrader};
use crate::store::{DispatchRecord, NewCheckResult, Store, Submission};
use crate::task::Check;
use crate::vcs::{GitHubClient, RepoHost, RepoRef};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub page_load_timeout: Duration,
    pub settle_delay: Duration,
    pub code_char_budget: usize,
}

impl From<&GradingConfig> for RunnerSettings {
    fn from(config: &GradingConfig) -> Self {
        Self {
            page_load_timeout: config.page_load_timeout,
            settle_delay: config.settle_delay,
            code_char_budget: config.code_char_budget,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&GradingConfig::default())
    }
}

/// What `evaluate` did with a submission.
#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    Evaluated {
        results: Vec<NewCheckResult>,
        aggregate: f64,
    },
    /// Results already existed for this (identity, task, round).
    AlreadyEvaluated,
}

pub struct CheckRunner {
    repo_host: Arc<dyn RepoHost>,
    grader: Arc<dyn QualitativeGrader>,
    browser: Arc<dyn BrowserLauncher>,
    settings: RunnerSettings,
}

impl CheckRunner {
    pub fn new(
        repo_host: Arc<dyn RepoHost>,
        grader: Arc<dyn QualitativeGrader>,
        browser: Arc<dyn BrowserLauncher>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            repo_host,
            grader,
            browser,
            settings,
        }
    }

    /// Production wiring: GitHub reads, the LLM grader and a Chromium browser.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.grading.request_timeout;
        let llm = ChatCompletionsClient::from_config(&config.llm, timeout)?;
        let repo_host = GitHubClient::new(
            config.github_token.clone(),
            config.github_username.clone(),
            timeout,
        )?;
        Ok(Self::new(
            Arc::new(repo_host),
            Arc::new(LlmGrader::new(Arc::new(llm), config.llm.model.clone())),
            Arc::new(ChromiumLauncher::new(config.grading.browser_cdp_url.clone())),
            RunnerSettings::from(&config.grading),
        ))
    }

    /// Evaluate a submission at most once and commit its results as one batch.
    pub async fn evaluate(
        &self,
        store: &dyn Store,
        submission: &Submission,
    ) -> Result<EvaluationOutcome, String> {
        let key = submission.key();
        if store.has_results(&key).await? {
            tracing::debug!("Skipping {}: already evaluated", key);
            return Ok(EvaluationOutcome::AlreadyEvaluated);
        }

        let dispatch = store
            .find_dispatch(
                &submission.identity,
                &submission.task_id,
                submission.round,
                &submission.nonce,
            )
            .await?
            .ok_or_else(|| format!("No dispatch found for {} (nonce {})", key, submission.nonce))?;

        let results = self.run(submission, &dispatch).await;

        if !store.record_results(&key, &results).await? {
            tracing::warn!("Results for {} were recorded concurrently; discarding", key);
            return Ok(EvaluationOutcome::AlreadyEvaluated);
        }

        let aggregate = aggregate_score(&results);
        tracing::info!(
            "Evaluated {}: {:.2}/{} ({:.1}%)",
            key,
            aggregate * results.len() as f64,
            results.len(),
            aggregate * 100.0
        );
        Ok(EvaluationOutcome::Evaluated { results, aggregate })
    }

    /// Run every check in order. Never fails: errors become zero scores.
    pub async fn run(&self, submission: &Submission, dispatch: &DispatchRecord) -> Vec<NewCheckResult> {
        let repo = RepoRef::parse(&submission.repo_url).map_err(CheckError::InvalidRepo);
        let commit = submission.commit_sha.as_str();
        let budget = self.settings.code_char_budget;
        let mut results = Vec::new();

        results.push(
            isolate(TIMING_CHECK, async {
                check_timing(self.repo_host.as_ref(), &repo.clone()?, dispatch.dispatched_at).await
            })
            .await,
        );

        results.push(
            isolate(LICENSE_CHECK, async {
                check_license(self.repo_host.as_ref(), &repo.clone()?, commit).await
            })
            .await,
        );

        results.push(
            isolate(README_CHECK, async {
                let readme = self.fetch(&repo, commit, "README.md").await?;
                check_readme(self.grader.as_ref(), readme.as_deref()).await
            })
            .await,
        );

        let index_html = self.fetch(&repo, commit, "index.html").await;
        results.push(
            isolate(CODE_CHECK, async {
                let code = index_html.clone()?;
                check_code(self.grader.as_ref(), code.as_deref(), budget).await
            })
            .await,
        );

        for (position, check) in dispatch.checks.iter().enumerate() {
            let Check::Rubric(rubric) = check else {
                continue;
            };
            let name = rubric_check_name(position);
            results.push(
                isolate(&name, async {
                    let code = index_html.clone()?;
                    check_rubric(self.grader.as_ref(), &name, rubric, code.as_deref(), budget)
                        .await
                })
                .await,
            );
        }

        let scripts: Vec<(usize, &str)> = dispatch
            .checks
            .iter()
            .enumerate()
            .filter_map(|(position, check)| check.script().map(|expr| (position, expr)))
            .collect();
        results.extend(
            run_functional_checks(
                self.browser.as_ref(),
                &submission.pages_url,
                &scripts,
                self.settings.page_load_timeout,
                self.settings.settle_delay,
            )
            .await,
        );

        results
    }

    async fn fetch(
        &self,
        repo: &Result<RepoRef, CheckError>,
        commit: &str,
        path: &str,
    ) -> Result<Option<String>, CheckError> {
        let repo = repo.as_ref().map_err(Clone::clone)?;
        self.repo_host
            .fetch_file(repo, commit, path)
            .await
            .map_err(|e| CheckError::RepoHost(e.to_string()))
    }
}

/// Run one check; errors and panics become a zero score for that check.
async fn isolate<F>(name: &str, check: F) -> NewCheckResult
where
    F: Future<Output = Result<NewCheckResult, CheckError>>,
{
    let result = match AssertUnwindSafe(check).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(error)) => {
            tracing::warn!(check = name, "Check failed: {}", error);
            failed(name, &error)
        }
        Err(_) => failed(name, &CheckError::Panicked(name.to_string())),
    };
    tracing::info!(check = name, score = result.score, "Check finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::fakes::{FakeGrader, FakeLauncher, FakePage, FakeRepoHost};
    use crate::checks::{functional_check_name, PAGE_LOAD_CHECK};
    use crate::store::{contract, Acceptance, InMemoryStore};
    use crate::vcs::mit_license;
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn host() -> FakeRepoHost {
        FakeRepoHost {
            created_at: Some(Utc::now() + chrono::Duration::minutes(5)),
            ..Default::default()
        }
        .with_file("LICENSE", &mit_license(2025, "A"))
        .with_file("README.md", "# Sales\nOpen index.html. MIT licensed.")
        .with_file("index.html", "<title>Sales Summary a1b2c3d4</title>")
    }

    fn page() -> FakePage {
        FakePage {
            title: "Sales Summary a1b2c3d4".to_string(),
            ..Default::default()
        }
    }

    fn runner(host: FakeRepoHost, grader: FakeGrader, launcher: Arc<FakeLauncher>) -> CheckRunner {
        CheckRunner::new(
            Arc::new(host),
            Arc::new(grader),
            launcher,
            RunnerSettings {
                settle_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    async fn accepted_submission(store: &InMemoryStore, checks: Vec<Check>) -> Submission {
        let mut dispatch = contract::dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1");
        dispatch.checks = checks;
        store.record_dispatch(dispatch).await.unwrap();
        match store
            .accept_submission(contract::submission("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap()
        {
            Acceptance::Accepted(submission) => submission,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn title_checks() -> Vec<Check> {
        vec![Check::parse("js: document.title === `Sales Summary a1b2c3d4`")]
    }

    #[tokio::test]
    async fn runs_checks_in_order() {
        let store = InMemoryStore::new();
        let submission = accepted_submission(
            &store,
            vec![
                Check::parse("js: document.title === `Sales Summary a1b2c3d4`"),
                Check::parse("Page shows a total"),
            ],
        )
        .await;
        let launcher = Arc::new(FakeLauncher::new(page()));
        let runner = runner(host(), FakeGrader::scoring(9.0), launcher);

        let outcome = runner.evaluate(&store, &submission).await.unwrap();
        let EvaluationOutcome::Evaluated { results, aggregate } = outcome else {
            panic!("expected evaluation");
        };

        let names: Vec<&str> = results.iter().map(|r| r.check_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                TIMING_CHECK,
                LICENSE_CHECK,
                README_CHECK,
                CODE_CHECK,
                "Rubric check 2",
                "Functional check 1",
            ]
        );
        assert!(results.iter().all(|r| r.score > 0.8));
        assert!(aggregate > 0.9);
    }

    #[tokio::test]
    async fn readme_failure_does_not_stop_other_checks() {
        let store = InMemoryStore::new();
        let submission = accepted_submission(&store, title_checks()).await;
        let launcher = Arc::new(FakeLauncher::new(page()));
        let runner = runner(
            host(),
            FakeGrader::failing_on(7.0, "README.md"),
            launcher.clone(),
        );

        let EvaluationOutcome::Evaluated { results, .. } =
            runner.evaluate(&store, &submission).await.unwrap()
        else {
            panic!("expected evaluation");
        };

        let by_name = |name: &str| results.iter().find(|r| r.check_name == name).unwrap();
        assert_eq!(by_name(README_CHECK).score, 0.0);
        assert!(by_name(README_CHECK).reason.starts_with("Error:"));
        assert_eq!(by_name(LICENSE_CHECK).score, 1.0);
        assert_eq!(by_name(&functional_check_name(0)).score, 1.0);
        assert_eq!(store.results_for(&submission.key()).await.unwrap().len(), results.len());
    }

    #[tokio::test]
    async fn evaluates_once() {
        let store = InMemoryStore::new();
        let submission = accepted_submission(&store, title_checks()).await;
        let launcher = Arc::new(FakeLauncher::new(page()));
        let runner = runner(host(), FakeGrader::scoring(5.0), launcher.clone());

        let first = runner.evaluate(&store, &submission).await.unwrap();
        let second = runner.evaluate(&store, &submission).await.unwrap();

        assert!(matches!(first, EvaluationOutcome::Evaluated { .. }));
        assert!(matches!(second, EvaluationOutcome::AlreadyEvaluated));
        assert_eq!(launcher.opened.load(Ordering::SeqCst), 1);
        assert_eq!(store.results_for(&submission.key()).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn repo_host_outage_zeroes_repo_checks_only() {
        let store = InMemoryStore::new();
        let submission = accepted_submission(&store, title_checks()).await;
        let launcher = Arc::new(FakeLauncher::new(page()));
        let broken = FakeRepoHost {
            fail_fetches: true,
            ..Default::default()
        };
        let runner = runner(broken, FakeGrader::scoring(10.0), launcher);

        let EvaluationOutcome::Evaluated { results, .. } =
            runner.evaluate(&store, &submission).await.unwrap()
        else {
            panic!("expected evaluation");
        };

        for name in [TIMING_CHECK, LICENSE_CHECK, README_CHECK, CODE_CHECK] {
            let result = results.iter().find(|r| r.check_name == name).unwrap();
            assert_eq!(result.score, 0.0, "{}", name);
        }
        assert_eq!(results.last().unwrap().score, 1.0);
    }

    #[tokio::test]
    async fn unreachable_site_records_page_load() {
        let store = InMemoryStore::new();
        let submission = accepted_submission(
            &store,
            vec![Check::parse("js: true"), Check::parse("js: 1 === 1")],
        )
        .await;
        let launcher = Arc::new(FakeLauncher::new(FakePage {
            load_fails: true,
            ..Default::default()
        }));
        let runner = runner(host(), FakeGrader::scoring(5.0), launcher.clone());

        let EvaluationOutcome::Evaluated { results, .. } =
            runner.evaluate(&store, &submission).await.unwrap()
        else {
            panic!("expected evaluation");
        };
        assert_eq!(results.last().unwrap().check_name, PAGE_LOAD_CHECK);
        assert_eq!(results.len(), 5);
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 1);
    }
}
