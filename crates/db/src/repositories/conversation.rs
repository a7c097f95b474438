use replier_core::domain::channel::ChannelId;
use replier_core::domain::conversation::{
    ConversationTurn, FeedbackKind, FeedbackTally, TurnId,
};

use super::{decode_timestamp, encode_timestamp, get, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TURN_COLUMNS: &str = "id, channel_id, thread_ts, question_ts, user_id, question, answer,
                            sources_json, confidence, up_count, down_count, created_at";

fn count(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = get(row, column)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{column}: {raw}")))
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let sources_json: String = get(row, "sources_json")?;
    let confidence: String = get(row, "confidence")?;
    let created_at: String = get(row, "created_at")?;

    Ok(ConversationTurn {
        id: TurnId(get(row, "id")?),
        channel_id: ChannelId(get(row, "channel_id")?),
        thread_ts: get(row, "thread_ts")?,
        question_ts: get(row, "question_ts")?,
        user_id: get(row, "user_id")?,
        question: get(row, "question")?,
        answer: get(row, "answer")?,
        sources: serde_json::from_str(&sources_json)
            .map_err(|error| RepositoryError::Decode(format!("sources_json: {error}")))?,
        confidence: confidence
            .parse()
            .map_err(|error| RepositoryError::Decode(format!("confidence: {error}")))?,
        feedback: FeedbackTally { up: count(row, "up_count")?, down: count(row, "down_count")? },
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn record(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        let sources_json = serde_json::to_string(&turn.sources)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_turns (id, channel_id, thread_ts, question_ts, user_id,
                                             question, answer, sources_json, confidence,
                                             up_count, down_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id.0)
        .bind(&turn.channel_id.0)
        .bind(&turn.thread_ts)
        .bind(&turn.question_ts)
        .bind(&turn.user_id)
        .bind(&turn.question)
        .bind(&turn.answer)
        .bind(sources_json)
        .bind(turn.confidence.as_str())
        .bind(i64::from(turn.feedback.up))
        .bind(i64::from(turn.feedback.down))
        .bind(encode_timestamp(&turn.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_message(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
    ) -> Result<Option<ConversationTurn>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turns WHERE channel_id = ? AND thread_ts = ?"
        ))
        .bind(&channel_id.0)
        .bind(message_ts)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_turn).transpose()
    }

    async fn record_feedback(
        &self,
        channel_id: &ChannelId,
        message_ts: &str,
        kind: FeedbackKind,
    ) -> Result<Option<FeedbackTally>, RepositoryError> {
        let statement = match kind {
            FeedbackKind::Up => {
                "UPDATE conversation_turns SET up_count = up_count + 1
                 WHERE channel_id = ? AND thread_ts = ?
                 RETURNING up_count, down_count"
            }
            FeedbackKind::Down => {
                "UPDATE conversation_turns SET down_count = down_count + 1
                 WHERE channel_id = ? AND thread_ts = ?
                 RETURNING up_count, down_count"
            }
        };

        let row = sqlx::query(statement)
            .bind(&channel_id.0)
            .bind(message_ts)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(FeedbackTally {
                up: count(&row, "up_count")?,
                down: count(&row, "down_count")?,
            })),
            None => Ok(None),
        }
    }

    async fn recent_for_channel(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turns
             WHERE channel_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(&channel_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }
}
