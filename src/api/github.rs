//! GitHub REST/GraphQL client
//!
//! Implements [`ReviewApi`] over reqwest. Rate limit headers of the core REST
//! bucket are fed into the shared [`QuotaTracker`]; search and GraphQL report
//! their own buckets (`x-ratelimit-resource`) and never overwrite it. Every
//! call first waits on the tracker so a nearly exhausted quota delays calls
//! instead of burning the last requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, LINK, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::api::client::{GraphqlResponse, Page, ReviewApi};
use crate::api::headers::{is_core_resource, parse_rate_limit_headers, parse_rate_limit_resource, parse_retry_after};
use crate::domain::{CheckStatus, EnhancedItem, FilterConfig, MergeState, PullRequest, QuotaStatus, ReviewStatus};
use crate::error::{PrwatchError, Result};
use crate::limiter::{QuotaTracker, RateLimitHeaders};

/// GitHub REST base URL
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// GitHub GraphQL endpoint
pub const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Environment variable holding the token
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

const API_VERSION: &str = "2022-11-28";

/// Fallback delay after a secondary rate limit without `retry-after`
const SECONDARY_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Configuration for the GitHub client
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub base_url: String,
    pub graphql_url: String,
    pub timeout: Duration,
    /// Page size for list and search calls (max 100)
    pub per_page: u32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            timeout: Duration::from_secs(30),
            per_page: 100,
        }
    }
}

/// GitHub API client
pub struct GithubClient {
    client: Client,
    token: String,
    config: GithubConfig,
    quota: Arc<QuotaTracker>,
}

impl GithubClient {
    /// Create a client reading its token from `token_env`
    pub fn from_env(token_env: &str, config: GithubConfig, quota: Arc<QuotaTracker>) -> Result<Self> {
        let token = std::env::var(token_env).map_err(|_| PrwatchError::Auth(format!("{} not set", token_env)))?;
        Self::with_token(token, config, quota)
    }

    /// Create a client with an explicit token
    pub fn with_token(token: impl Into<String>, config: GithubConfig, quota: Arc<QuotaTracker>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PrwatchError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: token.into(),
            config: GithubConfig {
                per_page: config.per_page.clamp(1, 100),
                ..config
            },
            quota,
        })
    }

    pub fn quota(&self) -> Arc<QuotaTracker> {
        Arc::clone(&self.quota)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.rest_url(path))
    }

    /// Send a request, honoring quota and cancellation
    async fn execute(&self, builder: RequestBuilder, cancel: &CancellationToken) -> Result<(Value, HeaderMap)> {
        self.quota.wait(cancel).await?;

        let send = builder
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("prwatch/", env!("CARGO_PKG_VERSION")))
            .header("x-github-api-version", API_VERSION)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PrwatchError::Cancelled),
            response = send => response?,
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let rate = parse_rate_limit_headers(&headers);
        let core = is_core_resource(&headers);
        if let Some(rate) = &rate {
            if core {
                self.quota.update_from_headers(rate);
            } else {
                tracing::trace!(
                    resource = parse_rate_limit_resource(&headers).as_deref(),
                    remaining = rate.remaining,
                    "Ignoring rate limit of a separate bucket"
                );
            }
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, rate.as_ref(), &body);
            // Only core exhaustion and secondary limits back off globally.
            let bucket_exhausted = rate.as_ref().is_some_and(|r| r.remaining == 0);
            if let PrwatchError::QuotaExhausted(_) = error
                && (core || !bucket_exhausted)
            {
                self.quota.record_rate_limit(backoff_delay(rate.as_ref(), parse_retry_after(&headers)));
            }
            return Err(error);
        }
        self.quota.record_success();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(PrwatchError::Cancelled),
            body = response.json::<Value>() => body?,
        };
        Ok((body, headers))
    }

    /// Query `/rate_limit` (free of charge) and sync the tracker from its headers
    pub async fn sync_quota(&self, cancel: &CancellationToken) -> Result<QuotaStatus> {
        self.execute(self.get("rate_limit"), cancel).await?;
        Ok(self.quota.status())
    }

    async fn get_pulls_page(&self, builder: RequestBuilder, cancel: &CancellationToken) -> Result<(Vec<Value>, bool)> {
        let (body, headers) = self.execute(builder, cancel).await?;
        let items = match body {
            Value::Array(items) => items,
            mut other => match other.get_mut("items").map(Value::take) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
        };
        let has_next =
            has_next_page(&headers) || (link_missing(&headers) && items.len() as u32 >= self.config.per_page);
        Ok((items, has_next))
    }
}

#[async_trait]
impl ReviewApi for GithubClient {
    async fn list_pulls(
        &self,
        repo: &str,
        filter: &FilterConfig,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<PullRequest>> {
        let per_page = self.config.per_page.to_string();
        let page_str = page.to_string();
        let builder = self.get(&format!("repos/{}/pulls", repo)).query(&[
            ("state", filter.state.as_str()),
            ("sort", filter.sort.as_str()),
            ("direction", filter.direction.as_str()),
            ("per_page", per_page.as_str()),
            ("page", page_str.as_str()),
        ]);

        let (items, has_next) = self.get_pulls_page(builder, cancel).await?;
        let pulls = items.iter().filter_map(|v| pull_from_json(v, Some(repo))).collect();
        tracing::trace!(repo, page, has_next, "Listed pull requests");
        Ok(Page::new(pulls, has_next))
    }

    async fn search_pulls(&self, query: &str, page: u32, cancel: &CancellationToken) -> Result<Page<PullRequest>> {
        let per_page = self.config.per_page.to_string();
        let page_str = page.to_string();
        let builder = self.get("search/issues").query(&[
            ("q", query),
            ("per_page", per_page.as_str()),
            ("page", page_str.as_str()),
        ]);

        let (items, has_next) = self.get_pulls_page(builder, cancel).await?;
        let pulls = items.iter().filter_map(|v| pull_from_json(v, None)).collect();
        Ok(Page::new(pulls, has_next))
    }

    async fn list_org_repos(&self, org: &str, page: u32, cancel: &CancellationToken) -> Result<Page<String>> {
        let per_page = self.config.per_page.to_string();
        let page_str = page.to_string();
        let builder = self.get(&format!("orgs/{}/repos", org)).query(&[
            ("type", "all"),
            ("per_page", per_page.as_str()),
            ("page", page_str.as_str()),
        ]);

        let (items, has_next) = self.get_pulls_page(builder, cancel).await?;
        let repos = items
            .iter()
            .filter(|r| !r["archived"].as_bool().unwrap_or(false))
            .filter_map(|r| r["full_name"].as_str().map(str::to_string))
            .collect();
        Ok(Page::new(repos, has_next))
    }

    async fn graphql(&self, query: &str, variables: Value, cancel: &CancellationToken) -> Result<GraphqlResponse> {
        let builder = self
            .client
            .post(&self.config.graphql_url)
            .json(&json!({ "query": query, "variables": variables }));

        let (body, headers) = self.execute(builder, cancel).await?;
        let response = GraphqlResponse::from_value(body);
        if let Some(cost) = response.cost {
            tracing::debug!(cost, "GraphQL query cost");
            // Headers already account for the cost in their own bucket.
            if parse_rate_limit_headers(&headers).is_none() {
                self.quota.consume(cost);
            }
        }
        Ok(response)
    }

    async fn pull_detail(&self, pr: &PullRequest, cancel: &CancellationToken) -> Result<EnhancedItem> {
        let (detail, _) = self
            .execute(self.get(&format!("repos/{}/pulls/{}", pr.repo, pr.number)), cancel)
            .await?;

        let (reviews, _) = self
            .execute(
                self.get(&format!("repos/{}/pulls/{}/reviews", pr.repo, pr.number))
                    .query(&[("per_page", "100")]),
                cancel,
            )
            .await?;
        let review_states: Vec<&str> = reviews
            .as_array()
            .map(|rs| rs.iter().filter_map(|r| r["state"].as_str()).collect())
            .unwrap_or_default();

        let head_sha = detail
            .pointer("/head/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| pr.head_sha.clone());
        let check_status = match head_sha {
            Some(sha) => {
                let (checks, _) = self
                    .execute(self.get(&format!("repos/{}/commits/{}/check-runs", pr.repo, sha)), cancel)
                    .await?;
                let runs: Vec<(&str, Option<&str>)> = checks["check_runs"]
                    .as_array()
                    .map(|runs| {
                        runs.iter()
                            .map(|r| (r["status"].as_str().unwrap_or("queued"), r["conclusion"].as_str()))
                            .collect()
                    })
                    .unwrap_or_default();
                CheckStatus::from_check_runs(runs)
            }
            None => CheckStatus::Unknown,
        };

        Ok(EnhancedItem {
            comments: detail["comments"].as_u64().unwrap_or(0),
            review_comments: detail["review_comments"].as_u64().unwrap_or(0),
            review_status: ReviewStatus::from_review_states(review_states),
            check_status,
            merge_state: MergeState::parse(detail["mergeable_state"].as_str()),
            additions: detail["additions"].as_u64().unwrap_or(0),
            deletions: detail["deletions"].as_u64().unwrap_or(0),
            changed_files: detail["changed_files"].as_u64().unwrap_or(0),
            enhanced_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.config.base_url)
            .field("per_page", &self.config.per_page)
            .finish()
    }
}

/// Map a non-success status to the error taxonomy
pub fn classify_status(status: u16, rate: Option<&RateLimitHeaders>, body: &str) -> PrwatchError {
    let exhausted = rate.map(|r| r.remaining == 0).unwrap_or(false);
    let secondary = body.to_ascii_lowercase().contains("rate limit");
    match status {
        401 => PrwatchError::Auth(truncate(body)),
        403 | 429 if exhausted || secondary || status == 429 => {
            PrwatchError::QuotaExhausted(format!("HTTP {}: {}", status, truncate(body)))
        }
        _ => PrwatchError::Api {
            status,
            message: truncate(body),
        },
    }
}

/// How long to back off after a quota error
fn backoff_delay(rate: Option<&RateLimitHeaders>, retry_after: Option<Duration>) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after;
    }
    match rate {
        Some(rate) if rate.remaining == 0 => (rate.reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
        _ => SECONDARY_LIMIT_DELAY,
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

fn has_next_page(headers: &HeaderMap) -> bool {
    headers
        .get(LINK)
        .and_then(|h| h.to_str().ok())
        .map(|link| link.contains("rel=\"next\""))
        .unwrap_or(false)
}

fn link_missing(headers: &HeaderMap) -> bool {
    !headers.contains_key(LINK)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// `https://api.github.com/repos/owner/name` -> `owner/name`
fn repo_from_api_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/repos/")?;
    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{}/{}", owner, name))
}

/// Build a pull request from a REST list item or a search hit
pub fn pull_from_json(value: &Value, repo_hint: Option<&str>) -> Option<PullRequest> {
    let number = value["number"].as_u64()?;
    let repo = match repo_hint {
        Some(repo) => repo.to_string(),
        None => value
            .pointer("/base/repo/full_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| value["repository_url"].as_str().and_then(repo_from_api_url))?,
    };

    let mut pr = PullRequest::new(
        repo,
        number,
        value["title"].as_str().unwrap_or_default(),
        value.pointer("/user/login").and_then(Value::as_str).unwrap_or("ghost"),
    );
    if let Some(url) = value["html_url"].as_str() {
        pr.url = url.to_string();
    }
    if let Some(state) = value["state"].as_str() {
        pr.state = state.to_string();
    }
    pr.draft = value["draft"].as_bool().unwrap_or(false);
    pr.labels = value["labels"]
        .as_array()
        .map(|ls| ls.iter().filter_map(|l| l["name"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    pr.head_sha = value.pointer("/head/sha").and_then(Value::as_str).map(str::to_string);
    pr.created_at = parse_time(&value["created_at"]);
    pr.updated_at = parse_time(&value["updated_at"]);
    Some(pr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use reqwest::header::HeaderValue;

    fn rate(remaining: u32) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: Some(5000),
            remaining,
            reset_at: Utc::now() + ChronoDuration::minutes(10),
        }
    }

    struct Reply {
        status: &'static str,
        headers: Vec<(&'static str, String)>,
        body: &'static str,
    }

    fn reply(status: &'static str, resource: &str, limit: u32, remaining: u32, body: &'static str) -> Reply {
        let reset = (Utc::now() + ChronoDuration::minutes(10)).timestamp();
        Reply {
            status,
            headers: vec![
                ("x-ratelimit-limit", limit.to_string()),
                ("x-ratelimit-remaining", remaining.to_string()),
                ("x-ratelimit-reset", reset.to_string()),
                ("x-ratelimit-resource", resource.to_string()),
            ],
            body,
        }
    }

    /// Serve `replies` in order on a local port, one connection each
    async fn serve(replies: Vec<Reply>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }

                let mut response = format!("HTTP/1.1 {}\r\ncontent-type: application/json\r\n", reply.status);
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str(&format!(
                    "content-length: {}\r\nconnection: close\r\n\r\n{}",
                    reply.body.len(),
                    reply.body
                ));
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{}", addr)
    }

    fn local_client(base_url: &str, quota: Arc<QuotaTracker>) -> GithubClient {
        GithubClient::with_token(
            "t",
            GithubConfig {
                base_url: base_url.to_string(),
                graphql_url: format!("{}/graphql", base_url),
                ..Default::default()
            },
            quota,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_core_headers_update_tracker() {
        let base = serve(vec![reply("200 OK", "core", 5000, 4321, "[]")]).await;
        let quota = Arc::new(QuotaTracker::new(5000));
        let client = local_client(&base, Arc::clone(&quota));

        let page = client
            .list_pulls("o/r", &FilterConfig::default(), 1, &CancellationToken::new())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(quota.remaining(), 4321);
        assert!(quota.status().last_update.is_some());
    }

    #[tokio::test]
    async fn test_core_exhaustion_records_backoff() {
        let base = serve(vec![reply("403 Forbidden", "core", 5000, 0, r#"{"message":"API rate limit exceeded"}"#)]).await;
        let quota = Arc::new(QuotaTracker::new(5000));
        let client = local_client(&base, Arc::clone(&quota));

        let result = client
            .list_pulls("o/r", &FilterConfig::default(), 1, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PrwatchError::QuotaExhausted(_))));
        assert_eq!(quota.remaining(), 0);
        assert!(quota.is_rate_limited());
        assert!(quota.remaining_backoff().is_some());
    }

    #[tokio::test]
    async fn test_search_bucket_leaves_core_quota() {
        use crate::limiter::Priority;
        use crate::scheduler::{RefreshScheduler, SchedulerConfig};

        let base = serve(vec![
            reply("200 OK", "search", 30, 29, r#"{"items":[]}"#),
            reply("403 Forbidden", "search", 30, 0, r#"{"message":"API rate limit exceeded"}"#),
        ])
        .await;
        let quota = Arc::new(QuotaTracker::new(5000));
        let scheduler = RefreshScheduler::new(
            SchedulerConfig::default().with_stagger_window(Duration::ZERO),
            Arc::clone(&quota),
        );
        scheduler.add_source("bugs", Duration::from_secs(300), Priority::Normal);
        let client = local_client(&base, Arc::clone(&quota));
        let cancel = CancellationToken::new();

        client.search_pulls("is:pr label:bug", 1, &cancel).await.unwrap();
        assert_eq!(quota.status().limit, 5000);
        assert_eq!(quota.remaining(), 5000);
        assert!(scheduler.should_refresh("bugs"));

        let exhausted = client.search_pulls("is:pr label:bug", 2, &cancel).await;
        assert!(matches!(exhausted, Err(PrwatchError::QuotaExhausted(_))));
        assert_eq!(quota.remaining(), 5000);
        assert!(!quota.is_rate_limited());
    }

    #[tokio::test]
    async fn test_graphql_cost_not_debited_twice() {
        let body = r#"{"data":{"search":{"nodes":[]}},"extensions":{"cost":{"requestCount":3}}}"#;
        let base = serve(vec![
            reply("200 OK", "graphql", 5000, 4990, body),
            Reply {
                status: "200 OK",
                headers: Vec::new(),
                body,
            },
        ])
        .await;
        let quota = Arc::new(QuotaTracker::new(5000));
        let client = local_client(&base, Arc::clone(&quota));
        let cancel = CancellationToken::new();

        let response = client.graphql("query {}", json!({}), &cancel).await.unwrap();
        assert_eq!(response.cost, Some(3));
        assert_eq!(quota.remaining(), 5000);

        client.graphql("query {}", json!({}), &cancel).await.unwrap();
        assert_eq!(quota.remaining(), 4997);
    }

    #[test]
    fn test_classify_auth() {
        assert!(matches!(
            classify_status(401, None, "Bad credentials"),
            PrwatchError::Auth(_)
        ));
    }

    #[test]
    fn test_classify_primary_exhaustion() {
        let err = classify_status(403, Some(&rate(0)), "API rate limit exceeded");
        assert!(matches!(err, PrwatchError::QuotaExhausted(_)));
    }

    #[test]
    fn test_classify_secondary_limit() {
        let err = classify_status(403, Some(&rate(4000)), "You have exceeded a secondary rate limit");
        assert!(matches!(err, PrwatchError::QuotaExhausted(_)));
        assert!(matches!(classify_status(429, None, ""), PrwatchError::QuotaExhausted(_)));
    }

    #[test]
    fn test_classify_plain_forbidden_and_not_found() {
        assert!(matches!(
            classify_status(403, Some(&rate(4000)), "Resource not accessible"),
            PrwatchError::Api { status: 403, .. }
        ));
        assert!(matches!(
            classify_status(404, None, "Not Found"),
            PrwatchError::Api { status: 404, .. }
        ));
    }

    #[test]
    fn test_backoff_delay_prefers_retry_after() {
        assert_eq!(backoff_delay(Some(&rate(0)), Some(Duration::from_secs(3))), Duration::from_secs(3));
        let until_reset = backoff_delay(Some(&rate(0)), None);
        assert!(until_reset > Duration::from_secs(500) && until_reset <= Duration::from_secs(600));
        assert_eq!(backoff_delay(Some(&rate(10)), None), SECONDARY_LIMIT_DELAY);
    }

    #[test]
    fn test_has_next_page() {
        let mut headers = HeaderMap::new();
        assert!(!has_next_page(&headers));
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://api.github.com/repositories/1/pulls?page=2>; rel=\"next\", <https://api.github.com/repositories/1/pulls?page=5>; rel=\"last\"",
            ),
        );
        assert!(has_next_page(&headers));
    }

    #[test]
    fn test_pull_from_rest_item() {
        let item = json!({
            "number": 7,
            "title": "Add feature",
            "user": {"login": "alice"},
            "html_url": "https://github.com/o/r/pull/7",
            "state": "open",
            "draft": true,
            "labels": [{"name": "bug"}, {"name": "p1"}],
            "head": {"sha": "abc123"},
            "created_at": "2024-01-02T03:04:05Z",
            "updated_at": "2024-01-03T03:04:05Z"
        });
        let pr = pull_from_json(&item, Some("o/r")).unwrap();
        assert_eq!(pr.item_key(), "o/r#7");
        assert_eq!(pr.author, "alice");
        assert!(pr.draft);
        assert_eq!(pr.labels, vec!["bug".to_string(), "p1".to_string()]);
        assert_eq!(pr.head_sha.as_deref(), Some("abc123"));
        assert!(pr.created_at.is_some());
    }

    #[test]
    fn test_pull_from_search_hit() {
        let item = json!({
            "number": 3,
            "title": "Fix",
            "user": {"login": "bob"},
            "repository_url": "https://api.github.com/repos/acme/widgets"
        });
        let pr = pull_from_json(&item, None).unwrap();
        assert_eq!(pr.repo, "acme/widgets");
        assert!(!pr.draft);
    }

    #[test]
    fn test_pull_without_number_is_skipped() {
        assert!(pull_from_json(&json!({"title": "x"}), Some("o/r")).is_none());
    }

    #[test]
    fn test_from_env_missing_token() {
        let result = GithubClient::from_env(
            "PRWATCH_TEST_TOKEN_THAT_IS_NEVER_SET",
            GithubConfig::default(),
            Arc::new(QuotaTracker::default()),
        );
        assert!(matches!(result, Err(PrwatchError::Auth(_))));
    }

    #[test]
    fn test_per_page_clamped() {
        let client = GithubClient::with_token(
            "t",
            GithubConfig {
                per_page: 500,
                ..Default::default()
            },
            Arc::new(QuotaTracker::default()),
        )
        .unwrap();
        assert_eq!(client.config.per_page, 100);
        assert_eq!(client.rest_url("/repos/o/r"), "https://api.github.com/repos/o/r");
    }
}
