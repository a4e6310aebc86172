//! LLM-scored qualitative checks.

use super::{outcome, CheckError, CODE_CHECK, README_CHECK};
use crate::llm::{code_prompt, readme_prompt, rubric_prompt, truncate_chars, QualitativeGrader};
use crate::store::NewCheckResult;

async fn grade(
    grader: &dyn QualitativeGrader,
    name: &str,
    prompt: &str,
) -> Result<NewCheckResult, CheckError> {
    let grade = grader
        .score(prompt)
        .await
        .map_err(|e| CheckError::Grader(e.to_string()))?;
    Ok(outcome(
        name,
        grade.normalized(),
        grade.reason.clone(),
        format!("score={}/10", grade.score),
    ))
}

pub(crate) async fn check_readme(
    grader: &dyn QualitativeGrader,
    readme: Option<&str>,
) -> Result<NewCheckResult, CheckError> {
    match readme {
        None => Ok(outcome(README_CHECK, 0.0, "README.md not found", "")),
        Some(text) => grade(grader, README_CHECK, &readme_prompt(text)).await,
    }
}

pub(crate) async fn check_code(
    grader: &dyn QualitativeGrader,
    index_html: Option<&str>,
    budget: usize,
) -> Result<NewCheckResult, CheckError> {
    match index_html {
        None => Ok(outcome(CODE_CHECK, 0.0, "index.html not found", "")),
        Some(code) => grade(grader, CODE_CHECK, &code_prompt(code, budget)).await,
    }
}

/// Score one free-form requirement against `index.html`.
pub(crate) async fn check_rubric(
    grader: &dyn QualitativeGrader,
    name: &str,
    rubric: &str,
    index_html: Option<&str>,
    budget: usize,
) -> Result<NewCheckResult, CheckError> {
    match index_html {
        None => Ok(outcome(name, 0.0, "index.html not found", truncate_chars(rubric, 200))),
        Some(code) => grade(grader, name, &rubric_prompt(rubric, code, budget)).await,
    }
}
