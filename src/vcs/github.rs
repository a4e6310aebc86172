//! GitHub REST client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{PublishedSite, Publisher, RepoHost, RepoRef, SiteFile};

const GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";

/// GitHub client for repository reads and site publishing.
pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
    username: Option<String>,
    /// How long `publish` polls the new Pages URL before giving up
    pages_wait: Duration,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    html_url: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ContentInfo {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct BranchInfo {
    commit: CommitInfo,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    sha: String,
}

impl GitHubClient {
    /// Anonymous or authenticated client. Publishing needs both token and username.
    pub fn new(
        token: Option<String>,
        username: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_base: GITHUB_API_URL.to_string(),
            token,
            username,
            pages_wait: Duration::from_secs(300),
        })
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_pages_wait(mut self, pages_wait: Duration) -> Self {
        self.pages_wait = pages_wait;
        self
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "taskgrade");
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    fn owner(&self) -> anyhow::Result<&str> {
        self.username
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("GITHUB_USERNAME is required for publishing"))
    }

    fn pages_url(owner: &str, repo_name: &str) -> String {
        format!("https://{}.github.io/{}/", owner, repo_name)
    }

    fn html_url(owner: &str, repo_name: &str) -> String {
        format!("https://github.com/{}/{}", owner, repo_name)
    }

    async fn create_repo(&self, repo_name: &str, description: &str) -> anyhow::Result<String> {
        let resp = self
            .request(self.client.post(format!("{}/user/repos", self.api_base)))
            .json(&json!({
                "name": repo_name,
                "description": description,
                "private": false,
                "auto_init": false,
            }))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to create repository {}: {} - {}", repo_name, status, text);
        }

        let info: RepoInfo = serde_json::from_str(&text)?;
        tracing::info!("Created repository: {}", info.html_url);
        Ok(info.html_url)
    }

    /// Current blob sha of `path` on the default branch, if the file exists.
    async fn existing_sha(&self, repo: &RepoRef, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get_contents(repo, path, None).await?.map(|c| c.sha))
    }

    async fn get_contents(
        &self,
        repo: &RepoRef,
        path: &str,
        reference: Option<&str>,
    ) -> anyhow::Result<Option<ContentInfo>> {
        let mut builder = self.client.get(format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, repo.owner, repo.name, path
        ));
        if let Some(reference) = reference {
            builder = builder.query(&[("ref", reference)]);
        }

        let resp = self.request(builder).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to read {} from {}: {} - {}", path, repo, status, text);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn put_file(
        &self,
        repo: &RepoRef,
        file: &SiteFile,
        message: &str,
        sha: Option<String>,
    ) -> anyhow::Result<()> {
        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(&file.content),
            "branch": DEFAULT_BRANCH,
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let resp = self
            .request(self.client.put(format!(
                "{}/repos/{}/{}/contents/{}",
                self.api_base, repo.owner, repo.name, file.path
            )))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            anyhow::bail!("Failed to write {} to {}: {} - {}", file.path, repo, status, text);
        }
        tracing::debug!("Wrote {} to {}", file.path, repo);
        Ok(())
    }

    async fn enable_pages(&self, repo: &RepoRef) -> anyhow::Result<()> {
        let resp = self
            .request(
                self.client
                    .post(format!("{}/repos/{}/{}/pages", self.api_base, repo.owner, repo.name)),
            )
            .json(&json!({ "source": { "branch": DEFAULT_BRANCH, "path": "/" } }))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            // Pages already enabled
            StatusCode::CONFLICT => Ok(()),
            status => {
                let text = resp.text().await?;
                anyhow::bail!("Failed to enable Pages for {}: {} - {}", repo, status, text)
            }
        }
    }

    async fn head_commit(&self, repo: &RepoRef) -> anyhow::Result<String> {
        let resp = self
            .request(self.client.get(format!(
                "{}/repos/{}/{}/branches/{}",
                self.api_base, repo.owner, repo.name, DEFAULT_BRANCH
            )))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to read head of {}: {} - {}", repo, status, text);
        }
        let branch: BranchInfo = serde_json::from_str(&text)?;
        Ok(branch.commit.sha)
    }

    /// Poll the Pages URL until it serves 200 or `pages_wait` elapses.
    async fn wait_for_pages(&self, pages_url: &str) -> bool {
        let deadline = tokio::time::Instant::now() + self.pages_wait;
        while tokio::time::Instant::now() < deadline {
            match self.client.get(pages_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!("Pages ready at {}", pages_url);
                    return true;
                }
                _ => tracing::debug!("Waiting for Pages at {}", pages_url),
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        tracing::warn!("Timed out waiting for Pages at {}, continuing", pages_url);
        false
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn fetch_file(
        &self,
        repo: &RepoRef,
        commit: &str,
        path: &str,
    ) -> anyhow::Result<Option<String>> {
        let Some(info) = self.get_contents(repo, path, Some(commit)).await? else {
            return Ok(None);
        };
        if info.encoding != "base64" {
            anyhow::bail!("Unsupported content encoding '{}' for {}", info.encoding, path);
        }

        // GitHub wraps base64 content at 60 columns.
        let packed: String = info.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(packed)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn repo_created_at(&self, repo: &RepoRef) -> anyhow::Result<DateTime<Utc>> {
        let resp = self
            .request(
                self.client
                    .get(format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name)),
            )
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to read repository {}: {} - {}", repo, status, text);
        }
        let info: RepoInfo = serde_json::from_str(&text)?;
        Ok(info.created_at)
    }
}

#[async_trait]
impl Publisher for GitHubClient {
    async fn publish(
        &self,
        repo_name: &str,
        description: &str,
        files: &[SiteFile],
    ) -> anyhow::Result<PublishedSite> {
        let owner = self.owner()?.to_string();
        let repo_url = self.create_repo(repo_name, description).await?;
        let repo = RepoRef {
            owner: owner.clone(),
            name: repo_name.to_string(),
        };

        for file in files {
            self.put_file(&repo, file, &format!("Add {}", file.path), None)
                .await?;
        }

        self.enable_pages(&repo).await?;
        let pages_url = Self::pages_url(&owner, repo_name);
        self.wait_for_pages(&pages_url).await;

        let commit_sha = self.head_commit(&repo).await?;
        Ok(PublishedSite {
            repo_url,
            commit_sha,
            pages_url,
        })
    }

    async fn update(&self, repo_name: &str, files: &[SiteFile]) -> anyhow::Result<PublishedSite> {
        let owner = self.owner()?.to_string();
        let repo = RepoRef {
            owner: owner.clone(),
            name: repo_name.to_string(),
        };

        for file in files {
            let sha = self.existing_sha(&repo, &file.path).await?;
            let message = match sha {
                Some(_) => format!("Update {}", file.path),
                None => format!("Add {}", file.path),
            };
            self.put_file(&repo, file, &message, sha).await?;
        }

        let commit_sha = self.head_commit(&repo).await?;
        Ok(PublishedSite {
            repo_url: Self::html_url(&owner, repo_name),
            commit_sha,
            pages_url: Self::pages_url(&owner, repo_name),
        })
    }
}
