use replier_core::domain::channel::ChannelId;
use replier_core::domain::chunk::{ChunkId, KnowledgeChunk, Provenance, ScoredChunk};
use replier_core::domain::source::SourceId;

use super::{
    decode_timestamp, encode_timestamp, get, sort_and_truncate, ChunkRepository, RepositoryError,
};
use crate::vector::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::DbPool;

pub struct SqlChunkRepository {
    pool: DbPool,
}

impl SqlChunkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeChunk, RepositoryError> {
    let source_type: String = get(row, "source_type")?;
    let retrieved_at: String = get(row, "retrieved_at")?;
    let chunk_index: i64 = get(row, "chunk_index")?;
    let embedding: Vec<u8> = get(row, "embedding")?;

    Ok(KnowledgeChunk {
        id: ChunkId(get(row, "id")?),
        channel_id: ChannelId(get(row, "channel_id")?),
        chunk_index: usize::try_from(chunk_index)
            .map_err(|_| RepositoryError::Decode(format!("chunk_index: {chunk_index}")))?,
        content: get(row, "content")?,
        content_hash: get(row, "content_hash")?,
        embedding: blob_to_vec(&embedding),
        provenance: Provenance {
            source_id: SourceId(get(row, "source_id")?),
            source_type: source_type
                .parse()
                .map_err(|error| RepositoryError::Decode(format!("source_type: {error}")))?,
            url: get(row, "url")?,
            title: get(row, "title")?,
            path: get(row, "path")?,
            file_type: get(row, "file_type")?,
            retrieved_at: decode_timestamp("retrieved_at", &retrieved_at)?,
        },
    })
}

#[async_trait::async_trait]
impl ChunkRepository for SqlChunkRepository {
    async fn replace_for_source(
        &self,
        source_id: &SourceId,
        chunks: Vec<KnowledgeChunk>,
    ) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_chunks WHERE source_id = ?")
            .bind(&source_id.0)
            .execute(&mut *tx)
            .await?;

        let mut stored = 0usize;
        for chunk in &chunks {
            if chunk.provenance.source_id != *source_id {
                return Err(RepositoryError::Decode(format!(
                    "chunk {} belongs to source {}, not {}",
                    chunk.id.0, chunk.provenance.source_id.0, source_id.0
                )));
            }

            let result = sqlx::query(
                "INSERT INTO knowledge_chunks (id, source_id, channel_id, chunk_index, content,
                                               content_hash, embedding, dims, source_type, url,
                                               title, path, file_type, retrieved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&chunk.id.0)
            .bind(&source_id.0)
            .bind(&chunk.channel_id.0)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.embedding.len() as i64)
            .bind(chunk.provenance.source_type.as_str())
            .bind(&chunk.provenance.url)
            .bind(&chunk.provenance.title)
            .bind(&chunk.provenance.path)
            .bind(&chunk.provenance.file_type)
            .bind(encode_timestamp(&chunk.provenance.retrieved_at))
            .execute(&mut *tx)
            .await?;
            stored += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn count_for_channel(&self, channel_id: &ChannelId) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE channel_id = ?")
            .bind(&channel_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn count_for_source(&self, source_id: &SourceId) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE source_id = ?")
            .bind(&source_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn search(
        &self,
        channel_id: &ChannelId,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RepositoryError> {
        if top_k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, source_id, channel_id, chunk_index, content, content_hash, embedding,
                    source_type, url, title, path, file_type, retrieved_at
             FROM knowledge_chunks
             WHERE channel_id = ? AND dims = ?",
        )
        .bind(&channel_id.0)
        .bind(query.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let score = cosine_similarity(query, &chunk.embedding);
            if score >= min_score {
                scored.push(ScoredChunk { chunk, score });
            }
        }

        Ok(sort_and_truncate(scored, top_k))
    }
}
