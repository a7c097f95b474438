//! GitHub REST fetchers for operator/operand repositories and issue threads.

use std::collections::HashSet;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use replier_core::config::GithubConfig;
use replier_core::GithubRepo;

use crate::document::SourceDocument;

const USER_AGENT: &str = "ForumReplierBot/1.0";
const MAX_FILE_BYTES: u64 = 500_000;
const MAX_DIRECTORY_DEPTH: usize = 4;
const MAX_COMMENTS_PER_ISSUE: usize = 10;
const ISSUES_PER_PAGE: usize = 50;

const PRIORITY_FILES: &[&str] = &[
    "README.md",
    "readme.md",
    "README.rst",
    "CONTRIBUTING.md",
    "CHANGELOG.md",
    "ARCHITECTURE.md",
    "docs/README.md",
    "doc/README.md",
];
const OPERATOR_DIRS: &[&str] = &[
    "api",
    "apis",
    "config/crd",
    "config/rbac",
    "config/samples",
    "bundle/manifests",
    "charts",
    "deploy",
    "hack",
];
const DOC_DIRS: &[&str] = &["docs", "doc", "documentation", "examples", "samples"];
const RELEVANT_EXTENSIONS: &[&str] =
    &["md", "rst", "txt", "adoc", "go", "py", "yaml", "yml", "json", "sh", "bash"];

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("could not build github client: {0}")]
    Client(String),
    #[error("github repository `{repo}` is not accessible (status {status})")]
    Unauthorized { repo: String, status: u16 },
    #[error("github request `{url}` failed: {reason}")]
    Request { url: String, reason: String },
    #[error("github request `{url}` returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentEntry>),
    Single(ContentEntry),
}

#[derive(Debug, Deserialize)]
struct IssueLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssueRecord {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    html_url: String,
    #[serde(default)]
    labels: Vec<IssueLabel>,
    #[serde(default)]
    comments: u64,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    #[serde(default)]
    body: Option<String>,
}

/// Thin REST client shared by the repository and issue fetchers.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base_url: String,
    max_files: usize,
    max_issues: usize,
}

impl GitHubClient {
    pub fn from_config(config: &GithubConfig) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|error| GitHubError::Client(error.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|error| GitHubError::Client(error.to_string()))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            max_files: config.max_files,
            max_issues: config.max_issues,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GitHubError> {
        let url = format!("{}{path}", self.api_base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|error| GitHubError::Request { url: url.clone(), reason: error.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::Status { url, status: status.as_u16() });
        }
        response
            .json()
            .await
            .map_err(|error| GitHubError::Request { url, reason: error.to_string() })
    }

    /// Confirms the repository is reachable with the configured credentials.
    async fn check_repository(&self, repo: &GithubRepo) -> Result<(), GitHubError> {
        let path = format!("/repos/{}", repo.full_name());
        match self.get_json::<serde_json::Value>(&path, &[]).await {
            Ok(_) => Ok(()),
            Err(GitHubError::Status { status, .. })
                if [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND]
                    .iter()
                    .any(|code| code.as_u16() == status) =>
            {
                Err(GitHubError::Unauthorized { repo: repo.full_name(), status })
            }
            Err(error) => Err(error),
        }
    }

    async fn contents(&self, repo: &GithubRepo, path: &str) -> Result<ContentsResponse, GitHubError> {
        self.get_json(&format!("/repos/{}/contents/{path}", repo.full_name()), &[]).await
    }

    /// Fetches documentation and operator-relevant files: priority files first,
    /// then operator directories, then documentation directories.
    pub async fn fetch_repository(&self, repo: &GithubRepo) -> Result<Vec<SourceDocument>, GitHubError> {
        self.check_repository(repo).await?;
        info!(event_name = "ingest.github.repo_started", repo = %repo.full_name(), "fetching repository files");

        let mut walk = RepositoryWalk { documents: Vec::new(), seen: HashSet::new() };

        for path in PRIORITY_FILES {
            if walk.documents.len() >= self.max_files {
                break;
            }
            match self.contents(repo, path).await {
                Ok(ContentsResponse::Single(entry)) if entry.kind == "file" => {
                    self.collect_file(repo, entry, "readme", &mut walk).await;
                }
                Ok(_) => {}
                Err(error) => debug!(path, error = %error, "priority file not available"),
            }
        }

        let directories = OPERATOR_DIRS
            .iter()
            .map(|dir| (*dir, classify_directory(dir)))
            .chain(DOC_DIRS.iter().map(|dir| (*dir, "docs")));
        for (dir, file_type) in directories {
            if walk.documents.len() >= self.max_files {
                break;
            }
            self.walk_directory(repo, dir, file_type, &mut walk).await;
        }

        info!(
            event_name = "ingest.github.repo_completed",
            repo = %repo.full_name(),
            files = walk.documents.len(),
            "repository fetch finished"
        );
        Ok(walk.documents)
    }

    async fn walk_directory(
        &self,
        repo: &GithubRepo,
        root: &str,
        file_type: &'static str,
        walk: &mut RepositoryWalk,
    ) {
        let mut pending = vec![(root.to_owned(), 0_usize)];
        while let Some((dir, depth)) = pending.pop() {
            if depth > MAX_DIRECTORY_DEPTH || walk.documents.len() >= self.max_files {
                continue;
            }
            let entries = match self.contents(repo, &dir).await {
                Ok(ContentsResponse::Listing(entries)) => entries,
                Ok(ContentsResponse::Single(entry)) => vec![entry],
                Err(error) => {
                    debug!(dir = %dir, error = %error, "directory not available");
                    continue;
                }
            };

            let mut subdirectories = Vec::new();
            for entry in entries {
                if walk.documents.len() >= self.max_files {
                    break;
                }
                match entry.kind.as_str() {
                    "dir" => subdirectories.push((entry.path, depth + 1)),
                    "file" => self.collect_file(repo, entry, file_type, walk).await,
                    _ => {}
                }
            }
            pending.extend(subdirectories.into_iter().rev());
        }
    }

    async fn collect_file(
        &self,
        repo: &GithubRepo,
        entry: ContentEntry,
        file_type: &str,
        walk: &mut RepositoryWalk,
    ) {
        if entry.size > MAX_FILE_BYTES || !is_relevant_file(&entry.path) || walk.seen.contains(&entry.path) {
            return;
        }

        // Directory listings omit file bodies.
        let entry = if entry.content.is_some() {
            entry
        } else {
            match self.contents(repo, &entry.path).await {
                Ok(ContentsResponse::Single(full)) => full,
                Ok(ContentsResponse::Listing(_)) => return,
                Err(error) => {
                    warn!(path = %entry.path, error = %error, "skipping unreadable file");
                    return;
                }
            }
        };

        let Some(text) = decode_content(&entry) else {
            warn!(path = %entry.path, "skipping file that is not utf-8 text");
            return;
        };

        let url = entry
            .html_url
            .clone()
            .unwrap_or_else(|| format!("{}/blob/HEAD/{}", repo.html_url(), entry.path));
        debug!(event_name = "ingest.github.file", path = %entry.path, file_type, "fetched file");
        walk.seen.insert(entry.path.clone());
        walk.documents.push(
            SourceDocument::new(url, text)
                .with_title(entry.path.clone())
                .with_path(entry.path, file_type),
        );
    }

    /// Fetches open issues then closed ones, most recently updated first, skipping
    /// pull requests. Each issue becomes one document with up to ten comments.
    pub async fn fetch_issues(&self, repo: &GithubRepo) -> Result<Vec<SourceDocument>, GitHubError> {
        self.check_repository(repo).await?;
        let mut documents = Vec::new();

        for state in ["open", "closed"] {
            let mut page = 1_u32;
            while documents.len() < self.max_issues {
                let query = [
                    ("state", state.to_owned()),
                    ("sort", "updated".to_owned()),
                    ("direction", "desc".to_owned()),
                    ("per_page", ISSUES_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ];
                let issues: Vec<IssueRecord> =
                    self.get_json(&format!("/repos/{}/issues", repo.full_name()), &query).await?;
                let exhausted = issues.len() < ISSUES_PER_PAGE;

                for issue in issues {
                    if documents.len() >= self.max_issues {
                        break;
                    }
                    if issue.pull_request.is_some() {
                        continue;
                    }
                    let comments = self.issue_comments(repo, &issue).await;
                    documents.push(render_issue(&issue, &comments));
                }

                if exhausted {
                    break;
                }
                page += 1;
            }
        }

        info!(
            event_name = "ingest.github.issues_completed",
            repo = %repo.full_name(),
            issues = documents.len(),
            "issue fetch finished"
        );
        Ok(documents)
    }

    async fn issue_comments(&self, repo: &GithubRepo, issue: &IssueRecord) -> Vec<String> {
        if issue.comments == 0 {
            return Vec::new();
        }
        let path = format!("/repos/{}/issues/{}/comments", repo.full_name(), issue.number);
        let query = [("per_page", MAX_COMMENTS_PER_ISSUE.to_string())];
        match self.get_json::<Vec<IssueComment>>(&path, &query).await {
            Ok(comments) => comments
                .into_iter()
                .filter_map(|comment| comment.body)
                .filter(|body| !body.trim().is_empty())
                .take(MAX_COMMENTS_PER_ISSUE)
                .collect(),
            Err(error) => {
                warn!(issue = issue.number, error = %error, "could not fetch issue comments");
                Vec::new()
            }
        }
    }
}

struct RepositoryWalk {
    documents: Vec<SourceDocument>,
    seen: HashSet<String>,
}

fn classify_directory(dir: &str) -> &'static str {
    if dir.contains("api") {
        "api_types"
    } else if dir.contains("crd") {
        "crd"
    } else if dir.contains("rbac") {
        "rbac"
    } else if dir.contains("sample") {
        "sample"
    } else if dir.contains("chart") || dir.contains("helm") {
        "helm_chart"
    } else if dir.contains("bundle") {
        "olm_bundle"
    } else {
        "code"
    }
}

fn is_relevant_file(path: &str) -> bool {
    if PRIORITY_FILES.contains(&path) {
        return true;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, extension)| RELEVANT_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()))
}

fn decode_content(entry: &ContentEntry) -> Option<String> {
    let raw = entry.content.as_deref()?;
    if entry.encoding.as_deref().is_some_and(|encoding| encoding != "base64") {
        return Some(raw.to_owned());
    }
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).ok()?;
    String::from_utf8(bytes).ok()
}

fn render_issue(issue: &IssueRecord, comments: &[String]) -> SourceDocument {
    let labels = if issue.labels.is_empty() {
        "none".to_owned()
    } else {
        issue.labels.iter().map(|label| label.name.as_str()).collect::<Vec<_>>().join(", ")
    };

    let mut parts = vec![
        format!("# Issue #{}: {}", issue.number, issue.title),
        format!("Status: {}", issue.state),
        format!("Labels: {labels}"),
        String::new(),
        issue.body.clone().unwrap_or_default(),
    ];
    if !comments.is_empty() {
        parts.push("\n## Comments:".to_owned());
        for (index, comment) in comments.iter().enumerate() {
            parts.push(format!("\n### Comment {}:\n{comment}", index + 1));
        }
    }

    SourceDocument::new(issue.html_url.clone(), parts.join("\n"))
        .with_title(format!("Issue #{}: {}", issue.number, issue.title))
}
