//! Channel history as conversations.
//!
//! Top-level messages within the look-back window are read page by page, thread
//! replies are pulled in after their parent, and the result is grouped into one
//! document per thread. Consecutive standalone messages share a document.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use replier_slack::web::{HistoryMessage, SlackApiError, SlackWebApi};

use crate::document::SourceDocument;

const MIN_MESSAGE_CHARS: usize = 10;
const MAX_PAGES: usize = 50;

#[derive(Debug, Error)]
pub enum SlackHistoryError {
    #[error(transparent)]
    Slack(#[from] SlackApiError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HistoryLine {
    ts: String,
    thread_key: Option<String>,
    text: String,
    url: String,
}

pub struct SlackHistoryFetcher {
    web: Arc<dyn SlackWebApi>,
}

pub fn message_url(channel_id: &str, ts: &str) -> String {
    format!("https://slack.com/archives/{channel_id}/p{}", ts.replace('.', ""))
}

fn keep(message: &HistoryMessage) -> bool {
    message.subtype.is_none() && message.text.trim().chars().count() >= MIN_MESSAGE_CHARS
}

fn ts_value(ts: &str) -> f64 {
    ts.parse().unwrap_or(0.0)
}

impl SlackHistoryFetcher {
    pub fn new(web: Arc<dyn SlackWebApi>) -> Self {
        Self { web }
    }

    pub async fn fetch(
        &self,
        channel_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceDocument>, SlackHistoryError> {
        let oldest = (now - Duration::days(i64::from(days))).timestamp().to_string();
        let mut top_level = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.web.conversation_history(channel_id, &oldest, cursor.as_deref()).await?;
            top_level.extend(page.messages);
            cursor = page.next_cursor.filter(|next| !next.is_empty());
            if cursor.is_none() {
                break;
            }
        }
        top_level.sort_by(|a, b| ts_value(&a.ts).total_cmp(&ts_value(&b.ts)));

        let mut lines = Vec::new();
        for message in top_level {
            let is_parent = message.reply_count > 0
                && message.thread_ts.as_deref().map_or(true, |thread| thread == message.ts);
            let thread_key = is_parent.then(|| message.ts.clone());

            if keep(&message) {
                lines.push(HistoryLine {
                    url: message_url(channel_id, &message.ts),
                    ts: message.ts.clone(),
                    thread_key: thread_key.clone(),
                    text: message.text.trim().to_owned(),
                });
            }
            if is_parent {
                lines.extend(self.thread_replies(channel_id, &message.ts).await);
            }
        }

        let documents = group_conversations(lines);
        info!(
            event_name = "ingest.slack_history.completed",
            channel_id,
            days,
            conversations = documents.len(),
            "slack history fetched"
        );
        Ok(documents)
    }

    async fn thread_replies(&self, channel_id: &str, parent_ts: &str) -> Vec<HistoryLine> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = match self.web.conversation_replies(channel_id, parent_ts, cursor.as_deref()).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(channel_id, thread_ts = parent_ts, error = %error, "could not fetch thread replies");
                    break;
                }
            };
            replies.extend(
                page.messages
                    .into_iter()
                    .filter(|reply| reply.ts != parent_ts && keep(reply))
                    .map(|reply| HistoryLine {
                        url: message_url(channel_id, &reply.ts),
                        thread_key: Some(parent_ts.to_owned()),
                        text: reply.text.trim().to_owned(),
                        ts: reply.ts,
                    }),
            );
            cursor = page.next_cursor.filter(|next| !next.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        replies.sort_by(|a, b| ts_value(&a.ts).total_cmp(&ts_value(&b.ts)));
        replies
    }
}

fn group_conversations(lines: Vec<HistoryLine>) -> Vec<SourceDocument> {
    let mut documents = Vec::new();
    let mut current: Vec<HistoryLine> = Vec::new();

    for line in lines {
        if current.last().is_some_and(|last| last.thread_key != line.thread_key) {
            documents.push(conversation_document(&current));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        documents.push(conversation_document(&current));
    }
    documents
}

fn conversation_document(lines: &[HistoryLine]) -> SourceDocument {
    let url = lines.first().map(|line| line.url.clone()).unwrap_or_default();
    let text = lines.iter().map(|line| line.text.as_str()).collect::<Vec<_>>().join("\n");
    SourceDocument::new(url, text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use replier_slack::web::{HistoryMessage, RecordingSlackWebApi};

    use super::{message_url, SlackHistoryFetcher};

    fn message(ts: &str, text: &str) -> HistoryMessage {
        HistoryMessage { ts: ts.to_owned(), user: Some("U1".to_owned()), text: text.to_owned(), ..HistoryMessage::default() }
    }

    #[test]
    fn message_urls_drop_the_timestamp_dot() {
        assert_eq!(
            message_url("C123", "1700000000.000100"),
            "https://slack.com/archives/C123/p1700000000000100"
        );
    }

    #[tokio::test]
    async fn threads_are_grouped_with_replies_in_order() {
        let web = Arc::new(RecordingSlackWebApi::default());
        let parent = HistoryMessage { reply_count: 2, ..message("1700000200.000000", "How do I rotate the certs?") };
        web.set_history(vec![
            message("1700000300.000000", "Standalone note about upgrades"),
            parent,
            message("1700000100.000000", "First standalone message here"),
            HistoryMessage { subtype: Some("channel_join".to_owned()), ..message("1700000150.000000", "joined the channel") },
            message("1700000160.000000", "short"),
        ])
        .await;
        web.set_replies(
            "1700000200.000000",
            vec![
                message("1700000200.000000", "How do I rotate the certs?"),
                message("1700000260.000000", "Then restart the operator pod."),
                message("1700000250.000000", "Delete the secret named widget-tls."),
            ],
        )
        .await;

        let now = Utc.timestamp_opt(1_700_100_000, 0).single().expect("now");
        let documents = SlackHistoryFetcher::new(web).fetch("C9", 30, now).await.expect("fetch");

        assert_eq!(documents.len(), 3);
        assert_eq!(documents[0].content, "First standalone message here");
        assert_eq!(
            documents[1].content,
            "How do I rotate the certs?\nDelete the secret named widget-tls.\nThen restart the operator pod."
        );
        assert_eq!(documents[1].url, "https://slack.com/archives/C9/p1700000200000000");
        assert_eq!(documents[2].content, "Standalone note about upgrades");
    }

    #[tokio::test]
    async fn empty_history_yields_no_documents() {
        let web = Arc::new(RecordingSlackWebApi::default());
        let documents = SlackHistoryFetcher::new(web).fetch("C9", 7, Utc::now()).await.expect("fetch");
        assert!(documents.is_empty());
    }
}
