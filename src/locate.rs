//! Remote image locator.
//!
//! For every branch range, list the branch's files through the Git trees API,
//! keep the `.jpg` blobs whose id lies inside the range, and confirm each one
//! with a `HEAD` against its raw-content URL.
//!
//! # Failure handling
//!
//! - Tree listing answered with `403`/`429` and a rate-limit signal is retried
//!   per the [`RetryPolicy`]; every failed attempt goes to the error log.
//! - A branch whose listing fails or comes back empty is written to the
//!   failed-branches log and re-run once in a second pass after a cooldown.
//! - Existence probes are not retried; a failed probe drops that image.

use anyhow::{Context, Result};
use chrono::Local;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::branches::{load_ranges, GitBranches};
use crate::config::{Config, GithubConfig};
use crate::models::{trailing_image_number, RangeRecord};
use crate::retry::RetryPolicy;
use crate::runlog::{file_timestamp, line_timestamp, RunLog};

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("rate limit exceeded (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid tree response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TreeError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TreeError::RateLimited { .. })
    }
}

fn is_rate_limited(status: u16, headers: &HeaderMap, body: &str) -> bool {
    if status != 403 && status != 429 {
        return false;
    }
    let quota_spent = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    quota_spent || body.to_lowercase().contains("rate limit")
}

/// Trees API and raw-content access for one repository.
pub struct GithubClient {
    api: reqwest::Client,
    probe: reqwest::Client,
    api_url: String,
    raw_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
    user_agent: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, owner: &str, repo: &str, token: Option<String>) -> Result<Self> {
        // No timeout on tree listings.
        let api = reqwest::Client::builder().build()?;
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()?;
        Ok(Self {
            api,
            probe,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            raw_url: config.raw_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn tree_url(&self, branch: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_url, self.owner, self.repo, branch
        )
    }

    pub fn raw_image_url(&self, branch: &str, folder: &str, file_name: &str) -> String {
        let mut url = format!(
            "{}/{}/{}/refs/heads/{}",
            self.raw_url, self.owner, self.repo, branch
        );
        if !folder.is_empty() {
            url.push('/');
            url.push_str(folder);
        }
        url.push('/');
        url.push_str(file_name);
        url
    }

    /// One listing attempt: paths of all `.jpg` blobs on `branch`.
    pub async fn list_jpg_blobs(&self, branch: &str) -> Result<Vec<String>, TreeError> {
        let mut request = self
            .api
            .get(self.tree_url(branch))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let code = status.as_u16();
            if is_rate_limited(code, &headers, &body) {
                return Err(TreeError::RateLimited { status: code, body });
            }
            return Err(TreeError::Status { status: code, body });
        }

        let tree: TreeResponse = serde_json::from_str(&body)?;
        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob" && e.path.ends_with(".jpg"))
            .map(|e| e.path)
            .collect())
    }

    /// `HEAD url` answered with exactly 200.
    pub async fn exists(&self, url: &str) -> bool {
        match self
            .probe
            .head(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(resp) => resp.status().as_u16() == 200,
            Err(e) => {
                tracing::debug!(url, error = %e, "probe failed");
                false
            }
        }
    }
}

/// The three flat logs of one locate run.
#[derive(Debug, Clone)]
pub struct LocateLogs {
    pub failed: RunLog,
    pub errors: RunLog,
    pub success: RunLog,
}

impl LocateLogs {
    pub fn in_dir(dir: &Path, run_ts: &str) -> Self {
        Self {
            failed: RunLog::in_dir(dir, "failed_branches", run_ts),
            errors: RunLog::in_dir(dir, "error_log", run_ts),
            success: RunLog::in_dir(dir, "success_images", run_ts),
        }
    }
}

fn log_or_warn(log: &RunLog, message: &str) {
    if let Err(e) = log.append_event(message) {
        tracing::warn!(path = %log.path().display(), error = %e, "could not write run log");
    }
}

/// List `branch`, retrying rate-limited attempts per `policy`.
pub async fn list_with_retry(
    github: &GithubClient,
    branch: &str,
    policy: &RetryPolicy,
    error_log: &RunLog,
) -> Result<Vec<String>, TreeError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match github.list_jpg_blobs(branch).await {
            Ok(paths) => return Ok(paths),
            Err(e) => e,
        };

        let message = format!("Error fetching branch {}: {}", branch, err);
        tracing::warn!(branch, attempt, error = %err, "tree listing failed");
        log_or_warn(error_log, &message);

        if !(err.is_rate_limited() && policy.should_retry(attempt)) {
            return Err(err);
        }

        let delay = policy.delay();
        tracing::info!(
            branch,
            attempt,
            delay_secs = delay.as_secs(),
            "rate limit exceeded, waiting before retry"
        );
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone)]
pub struct BranchResult {
    pub range: RangeRecord,
    pub images: Vec<String>,
    pub failed: bool,
}

/// `(folder, file name)` of a repository path.
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder, name),
        None => ("", path),
    }
}

pub async fn process_branch(
    github: &GithubClient,
    range: &RangeRecord,
    policy: &RetryPolicy,
    logs: &LocateLogs,
) -> BranchResult {
    let paths = match list_with_retry(github, &range.branch, policy, &logs.errors).await {
        Ok(paths) if !paths.is_empty() => paths,
        _ => {
            log_or_warn(
                &logs.failed,
                &format!(
                    "Failed to fetch contents for branch: {} (range: {}-{})",
                    range.branch, range.start, range.end
                ),
            );
            return BranchResult {
                range: range.clone(),
                images: Vec::new(),
                failed: true,
            };
        }
    };

    let mut images = Vec::new();
    for path in &paths {
        let (folder, name) = split_path(path);
        let in_range = trailing_image_number(name).is_some_and(|n| range.contains(n));
        if !in_range {
            continue;
        }
        let url = github.raw_image_url(&range.branch, folder, name);
        if github.exists(&url).await {
            tracing::info!(%url, "found valid image");
            images.push(url);
        }
    }

    BranchResult {
        range: range.clone(),
        images,
        failed: false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocateReport {
    pub branches: usize,
    pub initially_failed: usize,
    /// Branches that failed in both passes.
    pub failed: Vec<String>,
    pub images: Vec<String>,
}

async fn run_pass(
    github: &GithubClient,
    ranges: &[RangeRecord],
    policy: &RetryPolicy,
    logs: &LocateLogs,
    concurrency: usize,
) -> Vec<BranchResult> {
    stream::iter(ranges)
        .map(|range| process_branch(github, range, policy, logs))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Both passes over `ranges`, results sorted with [`sort_image_urls`].
pub async fn locate_images(
    github: &GithubClient,
    ranges: &[RangeRecord],
    config: &GithubConfig,
    policy: &RetryPolicy,
    logs: &LocateLogs,
) -> LocateReport {
    let first = run_pass(github, ranges, policy, logs, config.concurrency).await;

    let retry: Vec<RangeRecord> = first
        .iter()
        .filter(|r| r.failed)
        .map(|r| r.range.clone())
        .collect();

    let mut results: Vec<BranchResult> = first.into_iter().filter(|r| !r.failed).collect();
    let mut failed = Vec::new();

    if !retry.is_empty() {
        let cooldown = policy.delay();
        tracing::info!(
            branches = retry.len(),
            cooldown_secs = cooldown.as_secs(),
            "retrying failed branches"
        );
        tokio::time::sleep(cooldown).await;

        for result in run_pass(github, &retry, policy, logs, config.retry_concurrency).await {
            if result.failed {
                failed.push(result.range.branch.clone());
            } else {
                results.push(result);
            }
        }
    }

    let mut images: Vec<String> = results.into_iter().flat_map(|r| r.images).collect();
    sort_image_urls(&mut images);

    LocateReport {
        branches: ranges.len(),
        initially_failed: retry.len(),
        failed,
        images,
    }
}

/// Sort key: file-name stem, numeric id, file name, full URL.
///
/// All name parts are lowercased. `a2.jpg < a5.jpg < a10.jpg`.
fn image_sort_key(url: &str) -> (String, u64, String, String) {
    let name = url.rsplit('/').next().unwrap_or(url).to_lowercase();
    let number = trailing_image_number(&name).unwrap_or(0);
    let stem = name
        .strip_suffix(".jpg")
        .map(|s| s.trim_end_matches(|c: char| c.is_ascii_digit()))
        .unwrap_or(&name)
        .to_string();
    (stem, number, name, url.to_string())
}

pub fn sort_image_urls(urls: &mut [String]) {
    urls.sort_by_cached_key(|u| image_sort_key(u));
}

pub fn write_results(output: &Path, logs: &LocateLogs, images: &[String]) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut body = String::new();
    for url in images {
        body.push_str(url);
        body.push('\n');
    }
    std::fs::write(output, &body)
        .with_context(|| format!("Failed to write output file: {}", output.display()))?;

    let header = format!(
        "Successfully fetched and sorted images at {}:",
        line_timestamp(Local::now())
    );
    let total = format!("Total images found: {}", images.len());
    logs.success.append_lines(
        [header.as_str(), total.as_str(), ""]
            .into_iter()
            .chain(images.iter().map(String::as_str)),
    )?;
    Ok(())
}

/// Entry point for `harvest locate`. `Ok(false)` when nothing was found.
pub async fn run_locate(
    config: &Config,
    owner: &str,
    repo: &str,
    output: &Path,
    token: Option<String>,
) -> Result<bool> {
    let logs_dir = config.workspace.logs_path();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;
    let logs = LocateLogs::in_dir(&logs_dir, &file_timestamp(Local::now()));

    tracing::info!("fetching remote branches");
    let source = GitBranches::new(&config.workspace.root);
    let ranges = load_ranges(&source, &config.workspace.remote)?;
    if ranges.is_empty() {
        println!("No valid branches found");
        return Ok(false);
    }
    tracing::info!(count = ranges.len(), "found valid branches");

    let github = GithubClient::new(&config.github, owner, repo, token)?;
    let policy = config.retry.policy();

    let report = locate_images(&github, &ranges, &config.github, &policy, &logs).await;

    if report.images.is_empty() {
        println!("No valid images found");
        return Ok(false);
    }

    write_results(output, &logs, &report.images)?;

    println!("locate {}/{}", owner, repo);
    println!("  branches processed: {}", report.branches);
    println!("  initially failed branches: {}", report.initially_failed);
    println!("  still failed branches: {}", report.failed.len());
    println!("  images found: {}", report.images.len());
    println!("  output: {}", output.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GithubClient {
        GithubClient::new(&GithubConfig::default(), "acme", "pics", None).unwrap()
    }

    #[test]
    fn sorts_by_stem_then_number() {
        let mut urls = vec![
            "https://raw/x/a5.jpg".to_string(),
            "https://raw/x/a10.jpg".to_string(),
            "https://raw/x/a2.jpg".to_string(),
        ];
        sort_image_urls(&mut urls);
        assert_eq!(
            urls,
            vec![
                "https://raw/x/a2.jpg",
                "https://raw/x/a5.jpg",
                "https://raw/x/a10.jpg"
            ]
        );
    }

    #[test]
    fn sort_groups_prefixes_and_breaks_ties_by_url() {
        let mut urls = vec![
            "https://raw/b/s1.jpg".to_string(),
            "https://raw/z/a3.jpg".to_string(),
            "https://raw/a/s1.jpg".to_string(),
            "https://raw/a/A2.jpg".to_string(),
        ];
        sort_image_urls(&mut urls);
        assert_eq!(
            urls,
            vec![
                "https://raw/a/A2.jpg",
                "https://raw/z/a3.jpg",
                "https://raw/a/s1.jpg",
                "https://raw/b/s1.jpg",
            ]
        );
    }

    #[test]
    fn builds_urls() {
        let gh = client();
        assert_eq!(
            gh.tree_url("s_1_to_9"),
            "https://api.github.com/repos/acme/pics/git/trees/s_1_to_9?recursive=1"
        );
        assert_eq!(
            gh.raw_image_url("s_1_to_9", "images_s_20240101_1_to_9", "s5.jpg"),
            "https://raw.githubusercontent.com/acme/pics/refs/heads/s_1_to_9/images_s_20240101_1_to_9/s5.jpg"
        );
        assert_eq!(
            gh.raw_image_url("b", "", "s5.jpg"),
            "https://raw.githubusercontent.com/acme/pics/refs/heads/b/s5.jpg"
        );
    }

    #[test]
    fn splits_paths() {
        assert_eq!(split_path("a/b/s1.jpg"), ("a/b", "s1.jpg"));
        assert_eq!(split_path("s1.jpg"), ("", "s1.jpg"));
    }

    #[test]
    fn rate_limit_detection() {
        let empty = HeaderMap::new();
        assert!(is_rate_limited(403, &empty, "API rate limit exceeded for 1.2.3.4"));
        assert!(!is_rate_limited(403, &empty, "Resource not accessible"));
        assert!(!is_rate_limited(404, &empty, "rate limit"));

        let mut spent = HeaderMap::new();
        spent.insert("x-ratelimit-remaining", "0".parse().unwrap());
        assert!(is_rate_limited(403, &spent, "forbidden"));
    }

    #[test]
    fn writes_output_and_success_log() {
        let tmp = tempfile::TempDir::new().unwrap();
        let logs = LocateLogs::in_dir(&tmp.path().join("logs"), "20240501_120000");
        let output = tmp.path().join("out/images.txt");
        let images = vec![
            "https://raw/x/a2.jpg".to_string(),
            "https://raw/x/s10.jpg".to_string(),
        ];

        write_results(&output, &logs, &images).unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "https://raw/x/a2.jpg\nhttps://raw/x/s10.jpg\n"
        );

        assert_eq!(
            logs.success.path(),
            tmp.path().join("logs/success_images_20240501_120000.log")
        );
        let log = std::fs::read_to_string(logs.success.path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 5);
        let header = regex::Regex::new(
            r"^Successfully fetched and sorted images at \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}:$",
        )
        .unwrap();
        assert!(header.is_match(lines[0]), "{}", lines[0]);
        assert_eq!(lines[1], "Total images found: 2");
        assert_eq!(lines[2], "");
        assert_eq!(&lines[3..], &["https://raw/x/a2.jpg", "https://raw/x/s10.jpg"]);
    }
}
