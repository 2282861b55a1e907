//! GitHub implementation of [`VcsHost`], governed by a self-tracked hourly request budget.
//!
//! GitHub allows 5000 authenticated requests per hour; the configured budget is deliberately
//! lower. When the budget is exhausted calls fail fast without reaching GitHub, and the first
//! exhaustion in a window files a best-effort issue in the ops repository.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::contract::{
    ClientError, Clock, OrgInfo, ReleaseAsset, ReleaseInfo, RepoInfo, VcsHost,
};
use crate::model::IssueRef;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "extension-registry";
const REPO_URL_PATTERN: &str = r"^https?://(?:www\.)?github\.com/([^/\s]+)/([^/\s]+?)(?:\.git)?/?$";

/// `(owner, repo)` of a GitHub repository URL, `.git` suffix and trailing slash tolerated.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let re = regex::Regex::new(REPO_URL_PATTERN).ok()?;
    let caps = re.captures(url.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Canonical web URL of a repository.
pub fn repo_url(owner: &str, repo: &str) -> String {
    format!("https://github.com/{owner}/{repo}")
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base_url: String,
    pub token: String,
    pub hourly_rate_limit: u64,
    /// `owner/repo` where operational alerts are filed.
    pub ops_repo: Option<String>,
}

/// Counts requests in fixed one-hour windows.
pub struct RateGovernor {
    limit: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    started: DateTime<Utc>,
    used: u64,
    alerted: bool,
}

/// Outcome of asking the governor for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Denied, and this is the first denial of the window.
    DeniedFirst,
    Denied,
}

impl RateGovernor {
    pub fn new(limit: u64, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        RateGovernor {
            limit,
            clock,
            state: Mutex::new(WindowState {
                started,
                used: 0,
                alerted: false,
            }),
        }
    }

    fn roll(&self, state: &mut WindowState) {
        let now = self.clock.now();
        if now - state.started >= Duration::hours(1) {
            state.started = now;
            state.used = 0;
            state.alerted = false;
        }
    }

    pub fn admit(&self) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.roll(&mut state);
        if state.used < self.limit {
            state.used += 1;
            Admission::Granted
        } else if !state.alerted {
            state.alerted = true;
            Admission::DeniedFirst
        } else {
            Admission::Denied
        }
    }

    pub fn remaining(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.roll(&mut state);
        self.limit.saturating_sub(state.used)
    }
}

pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubConfig,
    governor: RateGovernor,
}

#[derive(Deserialize)]
struct RepoResponse {
    html_url: String,
    #[serde(default)]
    stargazers_count: u64,
}

#[derive(Deserialize)]
struct AssetResponse {
    name: String,
    size: u64,
    browser_download_url: String,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Deserialize)]
struct OrgResponse {
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    blog: Option<String>,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig, clock: Arc<dyn Clock>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        tracing::info!(
            api_base_url = %config.api_base_url,
            hourly_rate_limit = config.hourly_rate_limit,
            token_set = !config.token.is_empty(),
            "Initialized GitHubClient"
        );
        let governor = RateGovernor::new(config.hourly_rate_limit, clock);
        Ok(GitHubClient {
            http,
            config,
            governor,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
    }

    /// Charges one request against the budget, filing the ops alert on first exhaustion.
    async fn charge(&self, what: &str) -> Result<(), ClientError> {
        match self.governor.admit() {
            Admission::Granted => Ok(()),
            Admission::DeniedFirst => {
                tracing::error!(what, limit = self.config.hourly_rate_limit, "[GITHUB] Hourly request budget exhausted");
                self.file_ops_alert().await;
                Err(format!("GitHub request budget exhausted ({what})").into())
            }
            Admission::Denied => {
                tracing::warn!(what, "[GITHUB] Request skipped, budget exhausted");
                Err(format!("GitHub request budget exhausted ({what})").into())
            }
        }
    }

    // Bypasses the governor: it only runs once the budget is already gone.
    async fn file_ops_alert(&self) {
        let Some((owner, repo)) = self.config.ops_repo.as_deref().and_then(|r| r.split_once('/')) else {
            return;
        };
        let body = json!({
            "title": "[Ops] GitHub API request budget exhausted",
            "body": format!(
                "The extension registry used its hourly budget of {} GitHub requests. \
                 Background workers will shrink their batches until the window resets.",
                self.config.hourly_rate_limit
            ),
        });
        let url = self.url(&format!("/repos/{owner}/{repo}/issues"));
        match self.request(reqwest::Method::POST, &url).json(&body).send().await {
            Ok(r) if r.status().is_success() => tracing::info!("[GITHUB] Filed ops alert issue"),
            Ok(r) => tracing::error!(status = %r.status(), "[GITHUB] Ops alert issue rejected"),
            Err(e) => tracing::error!(error = ?e, "[GITHUB] Failed to file ops alert issue"),
        }
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
    ) -> Result<Option<T>, ClientError> {
        self.charge(what).await?;
        let response = self.request(reqwest::Method::GET, &self.url(path)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(path, "[GITHUB] Not found");
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json::<T>().await?))
    }
}

#[async_trait]
impl VcsHost for GitHubClient {
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<RepoInfo>, ClientError> {
        let response: Option<RepoResponse> = self
            .get_optional("get_repo", &format!("/repos/{owner}/{repo}"))
            .await?;
        Ok(response.map(|r| RepoInfo {
            url: r.html_url,
            star_count: r.stargazers_count,
        }))
    }

    async fn get_release(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ReleaseInfo>, ClientError> {
        let response: Option<ReleaseResponse> = self
            .get_optional(
                "get_release",
                &format!("/repos/{owner}/{repo}/releases/tags/{tag}"),
            )
            .await?;
        Ok(response.map(|r| ReleaseInfo {
            draft: r.draft,
            prerelease: r.prerelease,
            assets: r
                .assets
                .into_iter()
                .map(|a| ReleaseAsset {
                    name: a.name,
                    size: a.size,
                    download_url: a.browser_download_url,
                })
                .collect(),
        }))
    }

    async fn get_org(&self, name: &str) -> Result<Option<OrgInfo>, ClientError> {
        let response: Option<OrgResponse> =
            self.get_optional("get_org", &format!("/orgs/{name}")).await?;
        Ok(response.map(|o| OrgInfo {
            verified: o.is_verified,
            blog_url: o.blog.filter(|b| !b.is_empty()),
        }))
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, ClientError> {
        self.charge("create_issue").await?;
        let url = self.url(&format!("/repos/{owner}/{repo}/issues"));
        let issue: IssueResponse = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::info!(owner, repo, number = issue.number, "[GITHUB] Created issue");
        Ok(IssueRef {
            number: issue.number,
            url: issue.html_url,
        })
    }

    async fn comment_on_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), ClientError> {
        self.charge("comment_on_issue").await?;
        let url = self.url(&format!("/repos/{owner}/{repo}/issues/{issue_number}/comments"));
        self.request(reqwest::Method::POST, &url)
            .json(&json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download_asset(&self, url: &str, dest: &Path) -> Result<(), ClientError> {
        // Asset downloads are served from a CDN and do not count against the API budget.
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        tracing::info!(url, dest = %dest.display(), size = bytes.len(), "[GITHUB] Downloaded release asset");
        Ok(())
    }

    fn remaining_budget(&self) -> u64 {
        self.governor.remaining()
    }
}
