use std::sync::Arc;

use replier_agent::{build_llm_client, PipelineSettings, PromptBuilder, QueryPipeline};
use replier_db::repositories::{SqlChannelRepository, SqlChunkRepository, SqlConversationRepository};
use replier_db::ChannelRepository;
use replier_ingest::build_embedder;

use crate::commands::{open_store, run_with_config, CommandResult};

/// Answers `question` from the channel's index without touching Slack. The
/// answer is not recorded as a conversation turn.
pub fn run(slack_channel_id: &str, question: &str) -> CommandResult {
    run_with_config("ask", |config| async move {
        let pool = open_store(&config).await?;
        let channel = SqlChannelRepository::new(pool.clone())
            .find_channel_by_slack_id(slack_channel_id)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?
            .ok_or_else(|| {
                ("channel_not_found", format!("channel `{slack_channel_id}` is not configured"), 7u8)
            })?;

        let embedder =
            build_embedder(&config.embedding).map_err(|error| ("embedding", error.to_string(), 8u8))?;
        let llm = build_llm_client(&config.llm).map_err(|error| ("llm", error.to_string(), 8u8))?;
        let prompts = PromptBuilder::new(config.retrieval.max_context_chars)
            .map_err(|error| ("prompt", error.to_string(), 8u8))?;
        let pipeline = QueryPipeline::new(
            Arc::new(SqlChunkRepository::new(pool.clone())),
            Arc::new(SqlConversationRepository::new(pool.clone())),
            embedder,
            llm,
            prompts,
            PipelineSettings::from_config(&config.retrieval, &config.llm),
        );

        let answer = pipeline
            .answer(&channel.id, question)
            .await
            .map_err(|error| ("query", error.to_string(), 10u8))?;
        pool.close().await;

        let mut message = format!("[{}] {}", answer.confidence.as_str(), answer.text);
        for source in &answer.sources {
            message.push_str(&format!("\nsource: {source}"));
        }
        Ok(message)
    })
}
