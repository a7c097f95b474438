use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use replier_core::config::{CrawlerConfig, GithubConfig};
use replier_core::SourceDescriptor;
use replier_slack::web::SlackWebApi;

use crate::crawler::{CrawlError, DocsCrawler};
use crate::document::SourceDocument;
use crate::github::{GitHubClient, GitHubError};
use crate::slack_history::{SlackHistoryError, SlackHistoryFetcher};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    SlackHistory(#[from] SlackHistoryError),
}

/// Turns a source descriptor into the documents it currently contains.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, descriptor: &SourceDescriptor) -> Result<Vec<SourceDocument>, FetchError>;
}

pub struct DefaultSourceFetcher {
    crawler: DocsCrawler,
    github: GitHubClient,
    slack_history: SlackHistoryFetcher,
}

impl DefaultSourceFetcher {
    pub fn new(
        crawler: &CrawlerConfig,
        github: &GithubConfig,
        slack: Arc<dyn SlackWebApi>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            crawler: DocsCrawler::from_config(crawler)?,
            github: GitHubClient::from_config(github)?,
            slack_history: SlackHistoryFetcher::new(slack),
        })
    }
}

#[async_trait]
impl SourceFetcher for DefaultSourceFetcher {
    async fn fetch(&self, descriptor: &SourceDescriptor) -> Result<Vec<SourceDocument>, FetchError> {
        match descriptor {
            SourceDescriptor::Documentation { root_url } => Ok(self.crawler.crawl(root_url).await?),
            SourceDescriptor::GithubRepository { repo, .. } => Ok(self.github.fetch_repository(repo).await?),
            SourceDescriptor::GithubIssues { repo } => Ok(self.github.fetch_issues(repo).await?),
            SourceDescriptor::SlackHistory { slack_channel_id, days } => {
                Ok(self.slack_history.fetch(slack_channel_id, *days, Utc::now()).await?)
            }
        }
    }
}
