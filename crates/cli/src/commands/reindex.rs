use std::sync::Arc;

use replier_db::repositories::{SqlChannelRepository, SqlChunkRepository, SqlSourceRepository};
use replier_db::ChannelRepository;
use replier_ingest::{build_embedder, DefaultSourceFetcher, Indexer, TextChunker};
use replier_slack::web::{SlackWebApi, SlackWebClient};

use crate::commands::{open_store, run_with_config, CommandResult};

/// Resets every source of the channel to pending and indexes them in the
/// foreground. Nothing is posted to Slack.
pub fn run(slack_channel_id: &str) -> CommandResult {
    run_with_config("reindex", |config| async move {
        let pool = open_store(&config).await?;
        let channel = SqlChannelRepository::new(pool.clone())
            .find_channel_by_slack_id(slack_channel_id)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?
            .ok_or_else(|| {
                ("channel_not_found", format!("channel `{slack_channel_id}` is not configured"), 7u8)
            })?;

        let web: Arc<dyn SlackWebApi> = Arc::new(
            SlackWebClient::new(config.slack.bot_token.clone())
                .map_err(|error| ("slack_client", error.to_string(), 8u8))?,
        );
        let embedder =
            build_embedder(&config.embedding).map_err(|error| ("embedding", error.to_string(), 8u8))?;
        let fetcher = DefaultSourceFetcher::new(&config.crawler, &config.github, web.clone())
            .map_err(|error| ("fetcher", error.to_string(), 8u8))?;
        let indexer = Indexer::new(
            Arc::new(SqlSourceRepository::new(pool.clone())),
            Arc::new(SqlChunkRepository::new(pool.clone())),
            Arc::new(fetcher),
            embedder,
            web,
        )
        .with_chunker(TextChunker::from_config(&config.retrieval))
        .with_batch_size(config.embedding.batch_size);

        let reset = indexer
            .reset_channel(&channel)
            .await
            .map_err(|error| ("indexing", error.to_string(), 9u8))?;
        let summary = indexer
            .index_channel(&channel)
            .await
            .map_err(|error| ("indexing", error.to_string(), 9u8))?;
        pool.close().await;

        let mut message = format!(
            "reindexed {}/{reset} source(s) into {} chunk(s)",
            summary.indexed, summary.chunks
        );
        for (source, reason) in &summary.failures {
            message.push_str(&format!("\nfailed {source}: {reason}"));
        }
        Ok(message)
    })
}
