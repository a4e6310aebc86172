//! Qualitative grading: one capability, `score(prompt) -> Grade`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatOptions, LlmClient};

/// Upper bound of the raw grader scale.
pub const MAX_SCORE: f64 = 10.0;

/// A grader verdict on the 0-10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub score: f64,
    pub reason: String,
}

impl Grade {
    /// Score mapped onto [0, 1].
    pub fn normalized(&self) -> f64 {
        (self.score / MAX_SCORE).clamp(0.0, 1.0)
    }
}

/// Scores free-form content against a rubric.
#[async_trait]
pub trait QualitativeGrader: Send + Sync {
    /// Errors cover transport failures and responses that are not a valid grade.
    async fn score(&self, prompt: &str) -> anyhow::Result<Grade>;
}

const SYSTEM_PROMPT: &str = "You are a strict reviewer of small static web applications. \
Reply with a single JSON object {\"score\": <integer 0-10>, \"reason\": \"<one sentence>\"} and nothing else.";

/// Grader backed by a chat completion model.
pub struct LlmGrader {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmGrader {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl QualitativeGrader for LlmGrader {
    async fn score(&self, prompt: &str) -> anyhow::Result<Grade> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let response = self
            .client
            .chat_completion_with_options(
                &self.model,
                &messages,
                ChatOptions {
                    temperature: Some(0.0),
                    max_tokens: Some(300),
                    json_object: true,
                },
            )
            .await?;

        let content = response
            .content
            .ok_or_else(|| anyhow::anyhow!("Grader returned no content"))?;
        parse_grade(&content)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGrade {
    score: f64,
    reason: String,
}

/// Parse a grader reply. Anything other than `{"score": 0-10, "reason": str}`
/// (optionally inside a single code fence) is an error.
pub fn parse_grade(content: &str) -> anyhow::Result<Grade> {
    let body = strip_code_fences(content);
    let raw: RawGrade = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("Malformed grader response ({}): {}", e, truncate_chars(content, 200)))?;

    if !raw.score.is_finite() || !(0.0..=MAX_SCORE).contains(&raw.score) {
        anyhow::bail!("Grader score {} outside 0-10", raw.score);
    }

    Ok(Grade {
        score: raw.score,
        reason: raw.reason,
    })
}

/// Remove a surrounding markdown code fence (```lang ... ```), if any.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `html`, ...) on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

/// First `budget` characters of `text` (never splits a code point).
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn readme_prompt(readme: &str) -> String {
    format!(
        "Evaluate this README.md for a small web project. Consider clarity, setup instructions, \
         explanation of the code, mention of the license, and formatting.\n\n{}",
        readme
    )
}

/// Prompt for `index.html`, truncated to `budget` characters.
pub fn code_prompt(code: &str, budget: usize) -> String {
    format!(
        "Evaluate the quality of this index.html. Consider cleanliness, structure, comments, \
         error handling, and responsiveness.\n\n{}",
        truncate_chars(code, budget)
    )
}

/// Prompt for a free-form task requirement checked against `index.html`.
pub fn rubric_prompt(rubric: &str, code: &str, budget: usize) -> String {
    format!(
        "Score how well this index.html satisfies the requirement below.\n\nRequirement: {}\n\n{}",
        rubric,
        truncate_chars(code, budget)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: Some(self.0.to_string()),
                finish_reason: Some("stop".to_string()),
                usage: None,
                model: None,
            })
        }
    }

    #[test]
    fn parses_plain_and_fenced() {
        let grade = parse_grade(r#"{"score": 7, "reason": "clear"}"#).unwrap();
        assert_eq!(grade.normalized(), 0.7);
        let fenced = parse_grade("```json\n{\"score\": 10, \"reason\": \"great\"}\n```").unwrap();
        assert_eq!(fenced.score, 10.0);
    }

    #[test]
    fn rejects_malformed_replies() {
        assert!(parse_grade("Score: 8/10").is_err());
        assert!(parse_grade(r#"{"score": 11, "reason": "x"}"#).is_err());
        assert!(parse_grade(r#"{"score": 5}"#).is_err());
        assert!(parse_grade(r#"{"score": 5, "reason": "x", "extra": 1}"#).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        let prompt = code_prompt(&"x".repeat(5000), 3000);
        assert_eq!(prompt.matches('x').count(), 3000);
    }

    #[tokio::test]
    async fn llm_grader_parses_reply() {
        let grader = LlmGrader::new(
            Arc::new(CannedClient(r#"{"score": 4, "reason": "sparse"}"#)),
            "m",
        );
        let grade = grader.score("README").await.unwrap();
        assert_eq!(grade.reason, "sparse");
        assert_eq!(grade.normalized(), 0.4);
    }

    #[tokio::test]
    async fn llm_grader_surfaces_parse_failure() {
        let grader = LlmGrader::new(Arc::new(CannedClient("I think it is fine")), "m");
        let err = grader.score("README").await.unwrap_err();
        assert!(err.to_string().contains("Malformed grader response"));
    }
}
