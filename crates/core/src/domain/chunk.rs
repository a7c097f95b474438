use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::channel::ChannelId;
use crate::domain::source::{SourceId, SourceType};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Stable id so re-indexing the same document replaces rather than duplicates.
    pub fn derive(source_id: &SourceId, url: &str, chunk_index: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_id.0.as_bytes());
        hasher.update(b"|");
        hasher.update(url.as_bytes());
        hasher.update(b"|");
        hasher.update(chunk_index.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Where a chunk came from. Carried into answers as citations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: SourceId,
    pub source_type: SourceType,
    pub url: String,
    pub title: Option<String>,
    pub path: Option<String>,
    pub file_type: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl Provenance {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().or(self.path.as_deref()).unwrap_or(&self.url)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub channel_id: ChannelId,
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub provenance: Provenance,
}

impl KnowledgeChunk {
    pub fn new(
        channel_id: ChannelId,
        chunk_index: usize,
        content: String,
        embedding: Vec<f32>,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: ChunkId::derive(&provenance.source_id, &provenance.url, chunk_index),
            channel_id,
            chunk_index,
            content_hash: content_hash(&content),
            content,
            embedding,
            provenance,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::{ChunkId, KnowledgeChunk, Provenance};
    use crate::domain::channel::ChannelId;
    use crate::domain::source::{SourceId, SourceType};

    fn provenance(url: &str) -> Provenance {
        Provenance {
            source_id: SourceId("src-1".to_owned()),
            source_type: SourceType::Documentation,
            url: url.to_owned(),
            title: None,
            path: None,
            file_type: None,
            retrieved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn chunk_ids_are_stable_across_reindexing() {
        let source = SourceId("src-1".to_owned());
        let first = ChunkId::derive(&source, "https://docs.example.com/a", 0);
        let second = ChunkId::derive(&source, "https://docs.example.com/a", 0);
        let other = ChunkId::derive(&source, "https://docs.example.com/a", 1);

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.0.len(), 64);
    }

    #[test]
    fn display_title_falls_back_to_path_then_url() {
        let mut provenance = provenance("https://docs.example.com/a");
        assert_eq!(provenance.display_title(), "https://docs.example.com/a");

        provenance.path = Some("docs/install.md".to_owned());
        assert_eq!(provenance.display_title(), "docs/install.md");

        provenance.title = Some("Install".to_owned());
        assert_eq!(provenance.display_title(), "Install");
    }

    #[test]
    fn new_chunk_hashes_its_content() {
        let chunk = KnowledgeChunk::new(
            ChannelId("ch".to_owned()),
            0,
            "hello".to_owned(),
            vec![1.0],
            provenance("https://docs.example.com/a"),
        );
        assert_eq!(
            chunk.content_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
