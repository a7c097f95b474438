//! Knowledge ingestion: fetching sources, chunking, embedding and storing.

pub mod chunker;
pub mod crawler;
pub mod document;
pub mod embedder;
pub mod fetcher;
pub mod github;
pub mod indexer;
pub mod slack_history;

pub use chunker::TextChunker;
pub use crawler::{CrawlError, DocsCrawler};
pub use document::SourceDocument;
pub use embedder::{build_embedder, Embedder, EmbeddingError, HashingEmbedder, OpenAiEmbedder};
pub use fetcher::{DefaultSourceFetcher, FetchError, SourceFetcher};
pub use github::{GitHubClient, GitHubError};
pub use indexer::{IndexError, IndexSummary, Indexer};
pub use slack_history::{SlackHistoryError, SlackHistoryFetcher};
