use replier_core::domain::channel::ChannelId;
use replier_core::domain::source::{KnowledgeSource, SourceId};

use super::{decode_timestamp, encode_timestamp, get, RepositoryError, SourceRepository};
use crate::DbPool;

pub struct SqlSourceRepository {
    pool: DbPool,
}

impl SqlSourceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SOURCE_COLUMNS: &str = "id, channel_id, source_type, url, status, last_indexed_at,
                              error_message, created_at";

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeSource, RepositoryError> {
    let source_type: String = get(row, "source_type")?;
    let status: String = get(row, "status")?;
    let last_indexed_at: Option<String> = get(row, "last_indexed_at")?;
    let created_at: String = get(row, "created_at")?;

    Ok(KnowledgeSource {
        id: SourceId(get(row, "id")?),
        channel_id: ChannelId(get(row, "channel_id")?),
        source_type: source_type
            .parse()
            .map_err(|error| RepositoryError::Decode(format!("source_type: {error}")))?,
        url: get(row, "url")?,
        status: status.parse().map_err(|error| RepositoryError::Decode(format!("status: {error}")))?,
        last_indexed_at: last_indexed_at
            .as_deref()
            .map(|raw| decode_timestamp("last_indexed_at", raw))
            .transpose()?,
        error_message: get(row, "error_message")?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl SourceRepository for SqlSourceRepository {
    async fn replace_for_channel(
        &self,
        channel_id: &ChannelId,
        sources: Vec<KnowledgeSource>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_sources WHERE channel_id = ?")
            .bind(&channel_id.0)
            .execute(&mut *tx)
            .await?;

        for source in &sources {
            sqlx::query(
                "INSERT INTO knowledge_sources (id, channel_id, source_type, url, status,
                                                last_indexed_at, error_message, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&source.id.0)
            .bind(&channel_id.0)
            .bind(source.source_type.as_str())
            .bind(&source.url)
            .bind(source.status.as_str())
            .bind(source.last_indexed_at.as_ref().map(encode_timestamp))
            .bind(&source.error_message)
            .bind(encode_timestamp(&source.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<KnowledgeSource>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM knowledge_sources
             WHERE channel_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&channel_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_source).collect()
    }

    async fn find_by_id(&self, id: &SourceId) -> Result<Option<KnowledgeSource>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM knowledge_sources WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_source).transpose()
    }

    async fn save(&self, source: KnowledgeSource) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE knowledge_sources SET status = ?, last_indexed_at = ?, error_message = ?
             WHERE id = ?",
        )
        .bind(source.status.as_str())
        .bind(source.last_indexed_at.as_ref().map(encode_timestamp))
        .bind(&source.error_message)
        .bind(&source.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("knowledge source {}", source.id.0)));
        }
        Ok(())
    }
}
