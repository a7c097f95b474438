use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::source::{KnowledgeSource, SourceStatus};
use crate::domain::workspace::WorkspaceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

/// A Slack channel the bot answers questions in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredChannel {
    pub id: ChannelId,
    pub workspace_id: WorkspaceId,
    pub slack_channel_id: String,
    pub slack_channel_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredChannel {
    pub fn new(
        workspace_id: WorkspaceId,
        slack_channel_id: impl Into<String>,
        slack_channel_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ChannelId(Uuid::new_v4().to_string()),
            workspace_id,
            slack_channel_id: slack_channel_id.into(),
            slack_channel_name,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A channel together with its configured sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: MonitoredChannel,
    pub sources: Vec<KnowledgeSource>,
}

impl ChannelConfig {
    pub fn is_configured(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn indexed_sources(&self) -> usize {
        self.sources.iter().filter(|source| source.status == SourceStatus::Indexed).count()
    }

    pub fn is_indexing(&self) -> bool {
        self.sources
            .iter()
            .any(|source| matches!(source.status, SourceStatus::Pending | SourceStatus::Indexing))
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelConfig, MonitoredChannel};
    use crate::domain::source::{KnowledgeSource, SourceDescriptor, SourceStatus};
    use crate::domain::workspace::WorkspaceId;

    #[test]
    fn counts_indexed_sources_and_reports_in_flight_work() {
        let channel = MonitoredChannel::new(WorkspaceId("ws".to_owned()), "C1", None);
        let docs = SourceDescriptor::documentation("https://docs.example.com").expect("docs");
        let mut indexed = KnowledgeSource::pending(channel.id.clone(), &docs);
        indexed.transition_to(SourceStatus::Indexing).expect("indexing");
        indexed.mark_indexed(chrono::Utc::now()).expect("indexed");
        let pending = KnowledgeSource::pending(channel.id.clone(), &docs);

        let config = ChannelConfig { channel, sources: vec![indexed, pending] };

        assert!(config.is_configured());
        assert_eq!(config.indexed_sources(), 1);
        assert!(config.is_indexing());
    }
}
