//! Turns a task brief into the files of a static single-page app.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{strip_code_fences, ChatMessage, ChatOptions, LlmClient};

/// What the builder is asked to produce.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub task: &'a str,
    pub round: u32,
    pub brief: &'a str,
    pub checks: &'a [String],
    /// Names of files that will sit next to `index.html`
    pub attachment_names: Vec<&'a str>,
}

/// Generated site content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltApp {
    pub index_html: String,
    pub readme: String,
}

#[async_trait]
pub trait AppBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest<'_>) -> anyhow::Result<BuiltApp>;
}

const APP_SYSTEM_PROMPT: &str = "You write complete, self-contained single-file web apps. \
Reply with the full contents of index.html only: inline CSS and JavaScript, CDN links allowed, no commentary.";

const README_SYSTEM_PROMPT: &str = "You write concise, professional README.md files for small web apps. \
Reply with markdown only.";

/// Builder backed by a chat completion model.
pub struct LlmAppBuilder {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmAppBuilder {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn complete(&self, system: &str, prompt: String) -> anyhow::Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        let response = self
            .client
            .chat_completion_with_options(
                &self.model,
                &messages,
                ChatOptions {
                    temperature: Some(0.2),
                    max_tokens: Some(4000),
                    json_object: false,
                },
            )
            .await?;
        let content = response
            .content
            .ok_or_else(|| anyhow::anyhow!("Model returned no content"))?;
        let stripped = strip_code_fences(&content);
        if stripped.is_empty() {
            anyhow::bail!("Model returned an empty document");
        }
        Ok(stripped.to_string())
    }
}

pub fn app_prompt(request: &BuildRequest<'_>) -> String {
    let mut prompt = format!("Task: {}\n\n{}\n", request.task, request.brief);
    if !request.attachment_names.is_empty() {
        prompt.push_str(&format!(
            "\nThese files are published next to index.html and can be fetched by relative URL: {}\n",
            request.attachment_names.join(", ")
        ));
    }
    if !request.checks.is_empty() {
        prompt.push_str("\nThe page will be verified against these checks:\n");
        for check in request.checks {
            prompt.push_str(&format!("- {}\n", check));
        }
    }
    prompt
}

fn readme_request(request: &BuildRequest<'_>, index_html: &str) -> String {
    format!(
        "Write README.md for this app (round {}).\n\nBrief:\n{}\n\nIt must include a summary, \
setup, usage, a code explanation and a license section naming the MIT license.\n\nindex.html:\n{}",
        request.round, request.brief, index_html
    )
}

#[async_trait]
impl AppBuilder for LlmAppBuilder {
    async fn build(&self, request: &BuildRequest<'_>) -> anyhow::Result<BuiltApp> {
        tracing::info!(task = request.task, round = request.round, "Generating app");
        let index_html = self.complete(APP_SYSTEM_PROMPT, app_prompt(request)).await?;
        let readme = self
            .complete(README_SYSTEM_PROMPT, readme_request(request, &index_html))
            .await?;
        Ok(BuiltApp { index_html, readme })
    }
}
