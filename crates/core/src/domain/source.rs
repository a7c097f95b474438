use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::domain::channel::ChannelId;
use crate::errors::DomainError;
use crate::scope::CrawlScope;

const MAX_ERROR_MESSAGE_CHARS: usize = 500;
const SLACK_HISTORY_SCHEME: &str = "slack://";
pub const DEFAULT_HISTORY_DAYS: u32 = 30;
const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Documentation,
    GithubOperator,
    GithubOperand,
    GithubIssues,
    SlackHistory,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documentation => "documentation",
            Self::GithubOperator => "github_operator",
            Self::GithubOperand => "github_operand",
            Self::GithubIssues => "github_issues",
            Self::SlackHistory => "slack_history",
        }
    }
}

impl FromStr for SourceType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "documentation" => Ok(Self::Documentation),
            "github_operator" => Ok(Self::GithubOperator),
            "github_operand" => Ok(Self::GithubOperand),
            "github_issues" => Ok(Self::GithubIssues),
            "slack_history" => Ok(Self::SlackHistory),
            other => Err(DomainError::InvalidSource {
                input: other.to_owned(),
                reason: "unknown source type".to_owned(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "indexing" => Ok(Self::Indexing),
            "indexed" => Ok(Self::Indexed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::InvariantViolation(format!("unknown source status `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoRole {
    Operator,
    Operand,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

impl GithubRepo {
    /// Accepts `https://github.com/<owner>/<repo>` with an optional `.git` suffix
    /// and trailing path (`/tree/main/...` is ignored).
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let invalid = |reason: &str| DomainError::InvalidSource {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(input.trim()).map_err(|_| invalid("not a valid URL"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("repository URL must use http or https"));
        }
        if !matches!(url.host_str(), Some("github.com" | "www.github.com")) {
            return Err(invalid("repository must be hosted on github.com"));
        }

        let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());
        let owner = segments.next().ok_or_else(|| invalid("missing repository owner"))?;
        let name = segments.next().ok_or_else(|| invalid("missing repository name"))?;
        let name = name.strip_suffix(".git").unwrap_or(name);
        if name.is_empty() {
            return Err(invalid("missing repository name"));
        }

        Ok(Self { owner: owner.to_owned(), name: name.to_owned() })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

/// What a channel asked to have indexed, before anything was fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Documentation { root_url: String },
    GithubRepository { repo: GithubRepo, role: RepoRole },
    GithubIssues { repo: GithubRepo },
    SlackHistory { slack_channel_id: String, days: u32 },
}

impl SourceDescriptor {
    pub fn documentation(root_url: &str) -> Result<Self, DomainError> {
        let scope = CrawlScope::from_root(root_url)?;
        Ok(Self::Documentation { root_url: scope.root_url().to_owned() })
    }

    pub fn github_repository(url: &str, role: RepoRole) -> Result<Self, DomainError> {
        Ok(Self::GithubRepository { repo: GithubRepo::parse(url)?, role })
    }

    pub fn github_issues(url: &str) -> Result<Self, DomainError> {
        Ok(Self::GithubIssues { repo: GithubRepo::parse(url)? })
    }

    pub fn slack_history(slack_channel_id: &str, days: u32) -> Result<Self, DomainError> {
        let slack_channel_id = slack_channel_id.trim();
        if slack_channel_id.is_empty() {
            return Err(DomainError::InvalidSource {
                input: slack_channel_id.to_owned(),
                reason: "slack channel id is required".to_owned(),
            });
        }
        if days == 0 || days > MAX_HISTORY_DAYS {
            return Err(DomainError::InvalidSource {
                input: days.to_string(),
                reason: format!("history window must be within 1..={MAX_HISTORY_DAYS} days"),
            });
        }

        Ok(Self::SlackHistory { slack_channel_id: slack_channel_id.to_owned(), days })
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Documentation { .. } => SourceType::Documentation,
            Self::GithubRepository { role: RepoRole::Operator, .. } => SourceType::GithubOperator,
            Self::GithubRepository { role: RepoRole::Operand, .. } => SourceType::GithubOperand,
            Self::GithubIssues { .. } => SourceType::GithubIssues,
            Self::SlackHistory { .. } => SourceType::SlackHistory,
        }
    }

    /// The string persisted alongside the source type.
    pub fn locator(&self) -> String {
        match self {
            Self::Documentation { root_url } => root_url.clone(),
            Self::GithubRepository { repo, .. } | Self::GithubIssues { repo } => repo.html_url(),
            Self::SlackHistory { slack_channel_id, days } => {
                format!("{SLACK_HISTORY_SCHEME}{slack_channel_id}?days={days}")
            }
        }
    }

    pub fn from_stored(source_type: SourceType, locator: &str) -> Result<Self, DomainError> {
        match source_type {
            SourceType::Documentation => Self::documentation(locator),
            SourceType::GithubOperator => Self::github_repository(locator, RepoRole::Operator),
            SourceType::GithubOperand => Self::github_repository(locator, RepoRole::Operand),
            SourceType::GithubIssues => Self::github_issues(locator),
            SourceType::SlackHistory => parse_slack_locator(locator),
        }
    }
}

fn parse_slack_locator(locator: &str) -> Result<SourceDescriptor, DomainError> {
    let rest = locator.strip_prefix(SLACK_HISTORY_SCHEME).ok_or_else(|| {
        DomainError::InvalidSource {
            input: locator.to_owned(),
            reason: format!("slack history locator must start with `{SLACK_HISTORY_SCHEME}`"),
        }
    })?;

    let (channel, query) = rest.split_once('?').unwrap_or((rest, ""));
    let days = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("days="))
        .map(|value| {
            value.parse::<u32>().map_err(|_| DomainError::InvalidSource {
                input: locator.to_owned(),
                reason: "days must be a positive integer".to_owned(),
            })
        })
        .transpose()?
        .unwrap_or(DEFAULT_HISTORY_DAYS);

    SourceDescriptor::slack_history(channel, days)
}

/// A configured source and where it is in the indexing lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: SourceId,
    pub channel_id: ChannelId,
    pub source_type: SourceType,
    pub url: String,
    pub status: SourceStatus,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeSource {
    pub fn pending(channel_id: ChannelId, descriptor: &SourceDescriptor) -> Self {
        Self {
            id: SourceId(Uuid::new_v4().to_string()),
            channel_id,
            source_type: descriptor.source_type(),
            url: descriptor.locator(),
            status: SourceStatus::Pending,
            last_indexed_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn descriptor(&self) -> Result<SourceDescriptor, DomainError> {
        SourceDescriptor::from_stored(self.source_type, &self.url)
    }

    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        matches!(
            (self.status, next),
            (SourceStatus::Pending, SourceStatus::Indexing)
                | (SourceStatus::Pending, SourceStatus::Failed)
                | (SourceStatus::Indexing, SourceStatus::Indexed)
                | (SourceStatus::Indexing, SourceStatus::Failed)
                | (SourceStatus::Indexed, SourceStatus::Pending)
                | (SourceStatus::Failed, SourceStatus::Pending)
        )
    }

    pub fn transition_to(&mut self, next: SourceStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidSourceTransition { from: self.status, to: next })
    }

    pub fn mark_indexed(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(SourceStatus::Indexed)?;
        self.last_indexed_at = Some(at);
        self.error_message = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: &str) -> Result<(), DomainError> {
        self.transition_to(SourceStatus::Failed)?;
        self.error_message = Some(truncate_error(message));
        Ok(())
    }
}

pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
