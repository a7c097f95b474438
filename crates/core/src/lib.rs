pub mod config;
pub mod domain;
pub mod errors;
pub mod scope;

pub use domain::channel::{ChannelConfig, ChannelId, MonitoredChannel};
pub use domain::chunk::{ChunkId, KnowledgeChunk, Provenance, ScoredChunk};
pub use domain::conversation::{
    Confidence, ConversationTurn, FeedbackKind, FeedbackTally, TurnId,
};
pub use domain::source::{
    GithubRepo, KnowledgeSource, RepoRole, SourceDescriptor, SourceId, SourceStatus, SourceType,
};
pub use domain::workspace::{Workspace, WorkspaceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use scope::CrawlScope;
