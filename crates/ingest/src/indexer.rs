//! Indexing job: fetch, chunk, embed and store every pending source of a channel.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use replier_core::{
    DomainError, KnowledgeChunk, KnowledgeSource, MonitoredChannel, Provenance, SourceStatus,
};
use replier_db::{ChunkRepository, RepositoryError, SourceRepository};
use replier_slack::blocks::{indexing_summary_message, OutboundMessage};
use replier_slack::web::SlackWebApi;

use crate::chunker::TextChunker;
use crate::document::SourceDocument;
use crate::embedder::{Embedder, EmbeddingError};
use crate::fetcher::{FetchError, SourceFetcher};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub chunks: usize,
    /// Sources deleted by a reconfiguration while the job was running.
    pub removed: usize,
    /// `(source locator, error message)` per failed source.
    pub failures: Vec<(String, String)>,
}

pub struct Indexer {
    sources: Arc<dyn SourceRepository>,
    chunks: Arc<dyn ChunkRepository>,
    fetcher: Arc<dyn SourceFetcher>,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
    notifier: Arc<dyn SlackWebApi>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        chunks: Arc<dyn ChunkRepository>,
        fetcher: Arc<dyn SourceFetcher>,
        embedder: Arc<dyn Embedder>,
        notifier: Arc<dyn SlackWebApi>,
    ) -> Self {
        Self {
            sources,
            chunks,
            fetcher,
            embedder,
            chunker: TextChunker::default(),
            notifier,
            batch_size: 64,
        }
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Puts every source of the channel back to `pending`. A source left in
    /// `indexing` by an interrupted job is failed first so it can be retried.
    pub async fn reset_channel(&self, channel: &MonitoredChannel) -> Result<usize, IndexError> {
        let mut reset = 0;
        for mut source in self.sources.list_for_channel(&channel.id).await? {
            if source.status == SourceStatus::Pending {
                reset += 1;
                continue;
            }
            if source.status == SourceStatus::Indexing {
                source.mark_failed("indexing was interrupted")?;
            }
            source.transition_to(SourceStatus::Pending)?;
            if self.store(&source).await? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Indexes the channel's pending sources one after another. A failing source
    /// is marked `failed` and the job moves on.
    pub async fn index_channel(&self, channel: &MonitoredChannel) -> Result<IndexSummary, IndexError> {
        let pending: Vec<KnowledgeSource> = self
            .sources
            .list_for_channel(&channel.id)
            .await?
            .into_iter()
            .filter(|source| source.status == SourceStatus::Pending)
            .collect();
        info!(
            event_name = "ingest.index.started",
            channel_id = %channel.slack_channel_id,
            sources = pending.len(),
            "indexing channel sources"
        );

        let mut summary = IndexSummary::default();
        for mut source in pending {
            source.transition_to(SourceStatus::Indexing)?;
            if !self.store(&source).await? {
                self.discard_removed(&source, &mut summary).await?;
                continue;
            }

            match self.index_source(&source).await {
                Ok(stored) => {
                    source.mark_indexed(Utc::now())?;
                    if !self.store(&source).await? {
                        self.discard_removed(&source, &mut summary).await?;
                        continue;
                    }
                    summary.indexed += 1;
                    summary.chunks += stored;
                    info!(
                        event_name = "ingest.index.source_indexed",
                        source_id = %source.id.0,
                        source_type = source.source_type.as_str(),
                        chunks = stored,
                        "source indexed"
                    );
                }
                Err(failure) => {
                    // A source deleted mid-run fails here on the chunk foreign key.
                    if self.sources.find_by_id(&source.id).await?.is_none() {
                        self.discard_removed(&source, &mut summary).await?;
                        continue;
                    }
                    let message = failure.to_string();
                    warn!(
                        event_name = "ingest.index.source_failed",
                        source_id = %source.id.0,
                        source_type = source.source_type.as_str(),
                        error = %message,
                        "source indexing failed"
                    );
                    source.mark_failed(&message)?;
                    if !self.store(&source).await? {
                        self.discard_removed(&source, &mut summary).await?;
                        continue;
                    }
                    summary.failures.push((source.url.clone(), message));
                }
            }
        }

        Ok(summary)
    }

    /// Writes the source's new state. `false` when the source no longer exists
    /// because the channel was reconfigured.
    async fn store(&self, source: &KnowledgeSource) -> Result<bool, IndexError> {
        match self.sources.save(source.clone()).await {
            Ok(()) => Ok(true),
            Err(RepositoryError::NotFound(_)) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn discard_removed(
        &self,
        source: &KnowledgeSource,
        summary: &mut IndexSummary,
    ) -> Result<(), IndexError> {
        self.chunks.replace_for_source(&source.id, Vec::new()).await?;
        summary.removed += 1;
        info!(
            event_name = "ingest.index.source_removed",
            source_id = %source.id.0,
            url = %source.url,
            "source removed by reconfiguration; skipped"
        );
        Ok(())
    }

    async fn index_source(&self, source: &KnowledgeSource) -> Result<usize, IndexError> {
        let descriptor = source.descriptor()?;
        let documents = self.fetcher.fetch(&descriptor).await?;
        let retrieved_at = Utc::now();

        let mut pieces: Vec<(usize, String, Provenance)> = Vec::new();
        for document in documents {
            let provenance = provenance_for(source, &document, retrieved_at);
            for (index, content) in self.chunker.chunk(&document.content).into_iter().enumerate() {
                pieces.push((index, content, provenance.clone()));
            }
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, content, _)| content.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                ))
                .into());
            }
            for ((index, content, provenance), embedding) in batch.iter().cloned().zip(vectors) {
                chunks.push(KnowledgeChunk::new(
                    source.channel_id.clone(),
                    index,
                    content,
                    embedding,
                    provenance,
                ));
            }
        }

        Ok(self.chunks.replace_for_source(&source.id, chunks).await?)
    }

    /// Indexes the channel and posts the outcome to it.
    pub async fn run(&self, channel: &MonitoredChannel) -> Result<IndexSummary, IndexError> {
        let summary = self.index_channel(channel).await?;
        let message = OutboundMessage::to_channel(
            channel.slack_channel_id.clone(),
            indexing_summary_message(summary.indexed, &summary.failures),
        );
        if let Err(failure) = self.notifier.post_message(&message).await {
            warn!(
                event_name = "ingest.index.notify_failed",
                channel_id = %channel.slack_channel_id,
                error = %failure,
                "could not post indexing summary"
            );
        }
        info!(
            event_name = "ingest.index.completed",
            channel_id = %channel.slack_channel_id,
            indexed = summary.indexed,
            failed = summary.failures.len(),
            chunks = summary.chunks,
            "indexing finished"
        );
        Ok(summary)
    }

    pub fn spawn(self: Arc<Self>, channel: MonitoredChannel) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(failure) = self.run(&channel).await {
                error!(
                    event_name = "ingest.index.aborted",
                    channel_id = %channel.slack_channel_id,
                    error = %failure,
                    "indexing job aborted"
                );
            }
        })
    }
}

fn provenance_for(
    source: &KnowledgeSource,
    document: &SourceDocument,
    retrieved_at: chrono::DateTime<Utc>,
) -> Provenance {
    Provenance {
        source_id: source.id.clone(),
        source_type: source.source_type,
        url: document.url.clone(),
        title: document.title.clone(),
        path: document.path.clone(),
        file_type: document.file_type.clone(),
        retrieved_at,
    }
}
