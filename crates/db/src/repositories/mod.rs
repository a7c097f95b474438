use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use thiserror::Error;

use replier_core::domain::channel::{ChannelId, MonitoredChannel};
use replier_core::domain::chunk::{KnowledgeChunk, ScoredChunk};
use replier_core::domain::conversation::{ConversationTurn, FeedbackKind, FeedbackTally};
use replier_core::domain::source::{KnowledgeSource, SourceId};
use replier_core::domain::workspace::{Workspace, WorkspaceId};

pub mod channel;
pub mod chunk;
pub mod conversation;
pub mod memory;
pub mod source;

pub use channel::SqlChannelRepository;
pub use chunk::SqlChunkRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryChannelRepository, InMemoryChunkRepository, InMemoryConversationRepository,
    InMemorySourceRepository,
};
pub use source::SqlSourceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Workspaces and the channels the bot watches in them.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Returns the stored workspace for `slack_team_id`, creating it when absent.
    async fn ensure_workspace(
        &self,
        slack_team_id: &str,
        slack_team_name: Option<&str>,
    ) -> Result<Workspace, RepositoryError>;

    /// Returns the stored channel, creating or reactivating it as needed.
    async fn ensure_channel(
        &self,
        workspace_id: &WorkspaceId,
        slack_channel_id: &str,
        slack_channel_name: Option<&str>,
    ) -> Result<MonitoredChannel, RepositoryError>;

    async fn find_channel_by_slack_id(
        &self,
        slack_channel_id: &str,
    ) -> Result<Option<MonitoredChannel>, RepositoryError>;

    async fn list_channels(&self) -> Result<Vec<MonitoredChannel>, RepositoryError>;
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Swaps the channel's source set. Chunks of removed sources go with them.
    async fn replace_for_channel(
        &self,
        channel_id: &ChannelId,
        sources: Vec<KnowledgeSource>,
    ) -> Result<(), RepositoryError>;

    async fn list_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<KnowledgeSource>, RepositoryError>;

    async fn find_by_id(&self, id: &SourceId) -> Result<Option<KnowledgeSource>, RepositoryError>;

    async fn save(&self, source: KnowledgeSource) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Replaces every chunk of `source_id` with `chunks` and returns how many were stored.
    async fn replace_for_source(
        &self,
        source_id: &SourceId,
        chunks: Vec<KnowledgeChunk>,
    ) -> Result<usize, RepositoryError>;

    async fn count_for_channel(&self, channel_id: &ChannelId) -> Result<usize, RepositoryError>;

    async fn count_for_source(&self, source_id: &SourceId) -> Result<usize, RepositoryError>;

    /// Top `top_k` chunks of the channel by cosine similarity, at or above `min_score`.
    async fn search(
        &self,
        channel_id: &ChannelId,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn record(&self, turn: ConversationTurn) -> Result<(), RepositoryError>;

    /// Looks a turn up by the ts of the reply message the bot posted.
    async fn find_by_message(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
    ) -> Result<Option<ConversationTurn>, RepositoryError>;

    /// Increments one side of the tally. `None` when no turn matches.
    async fn record_feedback(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
        kind: FeedbackKind,
    ) -> Result<Option<FeedbackTally>, RepositoryError>;

    /// The newest `limit` turns, oldest first.
    async fn recent_for_channel(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
}

pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn get<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn sort_and_truncate(mut scored: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
