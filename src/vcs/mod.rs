//! Repository host capabilities.
//!
//! `RepoHost` is the read side used by the check runner; `Publisher` is the
//! write side used by the deploy endpoint. `GitHubClient` implements both.

mod github;

pub use github::GitHubClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse `https://github.com/{owner}/{name}[.git][/...]`.
    pub fn parse(repo_url: &str) -> Result<Self, String> {
        let parsed = url::Url::parse(repo_url.trim())
            .map_err(|e| format!("Invalid repository URL '{}': {}", repo_url, e))?;
        let mut segments = parsed
            .path_segments()
            .ok_or_else(|| format!("Repository URL has no path: {}", repo_url))?
            .filter(|s| !s.is_empty());

        match (segments.next(), segments.next()) {
            (Some(owner), Some(name)) => Ok(Self {
                owner: owner.to_string(),
                name: name.trim_end_matches(".git").to_string(),
            }),
            _ => Err(format!("Repository URL must name owner and repo: {}", repo_url)),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Read access to hosted repositories.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Contents of `path` at `commit`, or `None` when the file does not exist.
    async fn fetch_file(
        &self,
        repo: &RepoRef,
        commit: &str,
        path: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn repo_created_at(&self, repo: &RepoRef) -> anyhow::Result<DateTime<Utc>>;
}

/// A file to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl SiteFile {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into().into_bytes(),
        }
    }
}

/// Where a published site lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSite {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Write access: create or update a repository and serve it as a static site.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create `repo_name`, commit `files`, enable static hosting.
    async fn publish(
        &self,
        repo_name: &str,
        description: &str,
        files: &[SiteFile],
    ) -> anyhow::Result<PublishedSite>;

    /// Overwrite `files` in an existing repository.
    async fn update(&self, repo_name: &str, files: &[SiteFile]) -> anyhow::Result<PublishedSite>;
}

/// MIT license text with the given year and holder.
pub fn mit_license(year: i32, holder: &str) -> String {
    format!(
        r#"MIT License

Copyright (c) {year} {holder}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#
    )
}
