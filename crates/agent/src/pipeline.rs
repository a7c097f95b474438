//! Retrieval-augmented answering for one channel.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use replier_core::config::{LlmConfig, RetrievalConfig};
use replier_core::{ChannelId, Confidence};
use replier_db::{ChunkRepository, ConversationRepository, RepositoryError};
use replier_ingest::{Embedder, EmbeddingError};

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::prompt::{parse_confidence, PromptBuilder, PromptError};

pub const NO_KNOWLEDGE_ANSWER: &str =
    "I don't have any knowledge indexed yet. Please configure my knowledge sources first!";
pub const NO_RELEVANT_ANSWER: &str =
    "I couldn't find relevant information to answer your question. Could you rephrase?";
const MAX_CITED_SOURCES: usize = 3;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
    pub confidence: Confidence,
    pub chunks_used: usize,
}

impl Answer {
    fn fallback(text: &str) -> Self {
        Self { text: text.to_owned(), sources: Vec::new(), confidence: Confidence::Low, chunks_used: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub recent_turns: usize,
    pub max_tokens: u32,
}

impl PipelineSettings {
    pub fn from_config(retrieval: &RetrievalConfig, llm: &LlmConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            min_score: retrieval.min_score,
            recent_turns: retrieval.recent_turns,
            max_tokens: llm.max_tokens,
        }
    }
}

pub struct QueryPipeline {
    chunks: Arc<dyn ChunkRepository>,
    conversations: Arc<dyn ConversationRepository>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    settings: PipelineSettings,
}

impl QueryPipeline {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        conversations: Arc<dyn ConversationRepository>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        prompts: PromptBuilder,
        settings: PipelineSettings,
    ) -> Self {
        Self { chunks, conversations, embedder, llm, prompts, settings }
    }

    /// Answers `question` from the channel's indexed knowledge. An empty index or
    /// a question with no relevant chunks still yields an answer, at low confidence.
    pub async fn answer(&self, channel_id: &ChannelId, question: &str) -> Result<Answer, PipelineError> {
        let indexed = self.chunks.count_for_channel(channel_id).await?;
        if indexed == 0 {
            info!(event_name = "query.pipeline.empty_index", channel_id = %channel_id.0, "no knowledge indexed");
            return Ok(Answer::fallback(NO_KNOWLEDGE_ANSWER));
        }

        let query = self.embedder.embed_query(question).await?;
        let retrieved = self
            .chunks
            .search(channel_id, &query, self.settings.top_k, self.settings.min_score)
            .await?;
        debug!(
            event_name = "query.pipeline.retrieved",
            channel_id = %channel_id.0,
            indexed,
            retrieved = retrieved.len(),
            "retrieved chunks"
        );
        if retrieved.is_empty() {
            return Ok(Answer::fallback(NO_RELEVANT_ANSWER));
        }

        let history = if self.settings.recent_turns == 0 {
            Vec::new()
        } else {
            self.conversations
                .recent_for_channel(channel_id, self.settings.recent_turns)
                .await?
                .into_iter()
                .filter(|turn| turn.feedback.net() >= 0)
                .collect()
        };

        let prompt = self.prompts.build(question, &retrieved, &history)?;
        let response = self
            .llm
            .complete(&CompletionRequest {
                system: prompt.system,
                prompt: prompt.user,
                max_tokens: self.settings.max_tokens,
            })
            .await?;
        let (text, confidence) = parse_confidence(&response);

        let mut sources: Vec<String> = Vec::new();
        for scored in &retrieved {
            let url = &scored.chunk.provenance.url;
            if sources.len() < MAX_CITED_SOURCES && !sources.contains(url) {
                sources.push(url.clone());
            }
        }

        info!(
            event_name = "query.pipeline.answered",
            channel_id = %channel_id.0,
            chunks = retrieved.len(),
            confidence = confidence.as_str(),
            model = self.llm.model(),
            "question answered"
        );
        Ok(Answer { text, sources, confidence, chunks_used: retrieved.len() })
    }
}
