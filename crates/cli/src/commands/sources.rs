use replier_core::ChannelConfig;
use replier_db::repositories::{SqlChannelRepository, SqlChunkRepository, SqlSourceRepository};
use replier_db::{ChannelRepository, ChunkRepository, SourceRepository};

use crate::commands::{open_store, run_with_config, CommandResult};

/// Lists a channel's knowledge sources, one per line:
/// `<status> <type> <url> chunks=<n>` plus the last error when there is one.
pub fn run(slack_channel_id: &str) -> CommandResult {
    run_with_config("sources", |config| async move {
        let pool = open_store(&config).await?;
        let channel = SqlChannelRepository::new(pool.clone())
            .find_channel_by_slack_id(slack_channel_id)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?
            .ok_or_else(|| {
                ("channel_not_found", format!("channel `{slack_channel_id}` is not configured"), 7u8)
            })?;

        let sources = SqlSourceRepository::new(pool.clone())
            .list_for_channel(&channel.id)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?;
        let chunks = SqlChunkRepository::new(pool.clone());

        let name = channel.slack_channel_name.clone().unwrap_or_else(|| slack_channel_id.to_owned());
        let listing = ChannelConfig { channel, sources };
        let mut header = format!(
            "{} source(s) for {name}, {} indexed",
            listing.sources.len(),
            listing.indexed_sources()
        );
        if listing.is_indexing() {
            header.push_str(", indexing pending");
        }
        let mut lines = vec![header];
        for source in &listing.sources {
            let count = chunks
                .count_for_source(&source.id)
                .await
                .map_err(|error| ("repository", error.to_string(), 6u8))?;
            let mut line = format!(
                "{} {} {} chunks={count}",
                source.status.as_str(),
                source.source_type.as_str(),
                source.url
            );
            if let Some(error) = &source.error_message {
                line.push_str(&format!(" error={error}"));
            }
            lines.push(line);
        }

        pool.close().await;
        Ok(lines.join("\n"))
    })
}
