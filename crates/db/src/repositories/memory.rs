use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use replier_core::domain::channel::{ChannelId, MonitoredChannel};
use replier_core::domain::chunk::{KnowledgeChunk, ScoredChunk};
use replier_core::domain::conversation::{ConversationTurn, FeedbackKind, FeedbackTally};
use replier_core::domain::source::{KnowledgeSource, SourceId};
use replier_core::domain::workspace::{Workspace, WorkspaceId};

use super::{
    sort_and_truncate, ChannelRepository, ChunkRepository, ConversationRepository,
    RepositoryError, SourceRepository,
};
use crate::vector::cosine_similarity;

#[derive(Default)]
pub struct InMemoryChannelRepository {
    workspaces: RwLock<HashMap<String, Workspace>>,
    channels: RwLock<Vec<MonitoredChannel>>,
}

#[async_trait::async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn ensure_workspace(
        &self,
        slack_team_id: &str,
        slack_team_name: Option<&str>,
    ) -> Result<Workspace, RepositoryError> {
        let mut workspaces = self.workspaces.write().await;
        let workspace = workspaces
            .entry(slack_team_id.to_owned())
            .or_insert_with(|| Workspace::new(slack_team_id, None));
        if let Some(name) = slack_team_name {
            workspace.slack_team_name = Some(name.to_owned());
        }
        Ok(workspace.clone())
    }

    async fn ensure_channel(
        &self,
        workspace_id: &WorkspaceId,
        slack_channel_id: &str,
        slack_channel_name: Option<&str>,
    ) -> Result<MonitoredChannel, RepositoryError> {
        let mut channels = self.channels.write().await;
        if let Some(existing) = channels.iter_mut().find(|channel| {
            channel.workspace_id == *workspace_id && channel.slack_channel_id == slack_channel_id
        }) {
            if let Some(name) = slack_channel_name {
                existing.slack_channel_name = Some(name.to_owned());
            }
            existing.is_active = true;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let channel = MonitoredChannel::new(
            workspace_id.clone(),
            slack_channel_id,
            slack_channel_name.map(str::to_owned),
        );
        channels.push(channel.clone());
        Ok(channel)
    }

    async fn find_channel_by_slack_id(
        &self,
        slack_channel_id: &str,
    ) -> Result<Option<MonitoredChannel>, RepositoryError> {
        let channels = self.channels.read().await;
        Ok(channels
            .iter()
            .find(|channel| channel.slack_channel_id == slack_channel_id && channel.is_active)
            .cloned())
    }

    async fn list_channels(&self) -> Result<Vec<MonitoredChannel>, RepositoryError> {
        Ok(self.channels.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemorySourceRepository {
    sources: RwLock<Vec<KnowledgeSource>>,
}

#[async_trait::async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn replace_for_channel(
        &self,
        channel_id: &ChannelId,
        sources: Vec<KnowledgeSource>,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.sources.write().await;
        stored.retain(|source| source.channel_id != *channel_id);
        stored.extend(sources);
        Ok(())
    }

    async fn list_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<KnowledgeSource>, RepositoryError> {
        let stored = self.sources.read().await;
        Ok(stored.iter().filter(|source| source.channel_id == *channel_id).cloned().collect())
    }

    async fn find_by_id(&self, id: &SourceId) -> Result<Option<KnowledgeSource>, RepositoryError> {
        let stored = self.sources.read().await;
        Ok(stored.iter().find(|source| source.id == *id).cloned())
    }

    async fn save(&self, source: KnowledgeSource) -> Result<(), RepositoryError> {
        let mut stored = self.sources.write().await;
        let existing = stored
            .iter_mut()
            .find(|existing| existing.id == source.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("knowledge source {}", source.id.0)))?;
        *existing = source;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryChunkRepository {
    chunks: RwLock<HashMap<String, KnowledgeChunk>>,
}

#[async_trait::async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn replace_for_source(
        &self,
        source_id: &SourceId,
        chunks: Vec<KnowledgeChunk>,
    ) -> Result<usize, RepositoryError> {
        let mut stored = self.chunks.write().await;
        stored.retain(|_, chunk| chunk.provenance.source_id != *source_id);
        for chunk in chunks {
            stored.insert(chunk.id.0.clone(), chunk);
        }
        Ok(stored.values().filter(|chunk| chunk.provenance.source_id == *source_id).count())
    }

    async fn count_for_channel(&self, channel_id: &ChannelId) -> Result<usize, RepositoryError> {
        let stored = self.chunks.read().await;
        Ok(stored.values().filter(|chunk| chunk.channel_id == *channel_id).count())
    }

    async fn count_for_source(&self, source_id: &SourceId) -> Result<usize, RepositoryError> {
        let stored = self.chunks.read().await;
        Ok(stored.values().filter(|chunk| chunk.provenance.source_id == *source_id).count())
    }

    async fn search(
        &self,
        channel_id: &ChannelId,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RepositoryError> {
        let stored = self.chunks.read().await;
        let scored = stored
            .values()
            .filter(|chunk| chunk.channel_id == *channel_id)
            .filter_map(|chunk| {
                let score = cosine_similarity(query, &chunk.embedding);
                (score >= min_score).then(|| ScoredChunk { chunk: chunk.clone(), score })
            })
            .collect();
        Ok(sort_and_truncate(scored, top_k))
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    turns: RwLock<Vec<ConversationTurn>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn record(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        self.turns.write().await.push(turn);
        Ok(())
    }

    async fn find_by_message(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
    ) -> Result<Option<ConversationTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        Ok(turns
            .iter()
            .find(|turn| turn.channel_id == *channel_id && turn.thread_ts == message_ts)
            .cloned())
    }

    async fn record_feedback(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
        kind: FeedbackKind,
    ) -> Result<Option<FeedbackTally>, RepositoryError> {
        let mut turns = self.turns.write().await;
        Ok(turns
            .iter_mut()
            .find(|turn| turn.channel_id == *channel_id && turn.thread_ts == message_ts)
            .map(|turn| {
                turn.feedback.record(kind);
                turn.feedback
            }))
    }

    async fn recent_for_channel(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        let matching: Vec<ConversationTurn> =
            turns.iter().filter(|turn| turn.channel_id == *channel_id).cloned().collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }
}
