//! Paragraph-aware text chunker.
//!
//! Paragraphs (`\n\n`) are packed into chunks of up to `chunk_size` characters.
//! When a chunk is flushed, the last `chunk_overlap` characters are carried into
//! the next one so a fact split across the boundary still retrieves. Paragraphs
//! longer than `chunk_size` are split on sentences, and sentences that are still
//! too long are split on whitespace.

use replier_core::config::RetrievalConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size - 1) }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Splits `text` into chunks. Blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let paragraph_len = char_len(paragraph);

            if char_len(&current) + paragraph_len <= self.chunk_size {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(paragraph);
                continue;
            }

            let overlap = if char_len(&current) > self.chunk_overlap {
                tail_chars(&current, self.chunk_overlap).to_owned()
            } else {
                String::new()
            };
            flush(&mut chunks, &mut current);

            if paragraph_len > self.chunk_size {
                chunks.extend(self.split_long(paragraph));
            } else if overlap.trim().is_empty() {
                current.push_str(paragraph);
            } else {
                current = format!("{}\n\n{paragraph}", overlap.trim_start());
            }
        }

        flush(&mut chunks, &mut current);
        chunks
    }

    fn split_long(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let sentences = text.replace(". ", ".\n");

        for sentence in sentences.lines().map(str::trim).filter(|s| !s.is_empty()) {
            for part in hard_split(sentence, self.chunk_size) {
                if !current.is_empty() && char_len(&current) + 1 + char_len(part) > self.chunk_size {
                    flush(&mut pieces, &mut current);
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(part);
            }
        }

        flush(&mut pieces, &mut current);
        pieces
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_owned());
    }
    current.clear();
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn tail_chars(text: &str, count: usize) -> &str {
    let skip = char_len(text).saturating_sub(count);
    match text.char_indices().nth(skip) {
        Some((index, _)) => &text[index..],
        None => "",
    }
}

/// Cuts `text` into pieces of at most `limit` characters, preferring to break
/// after whitespace.
fn hard_split(text: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while char_len(rest) > limit {
        let cut = rest.char_indices().nth(limit).map_or(rest.len(), |(index, _)| index);
        let at = rest[..cut].rfind(char::is_whitespace).filter(|&index| index > 0).unwrap_or(cut);
        let (head, tail) = rest.split_at(at);
        pieces.push(head.trim_end());
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::TextChunker;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = TextChunker::default().chunk("Install the operator.\n\nThen apply the CR.");
        assert_eq!(chunks, vec!["Install the operator.\n\nThen apply the CR.".to_owned()]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(TextChunker::default().chunk("  \n\n \n").is_empty());
    }

    #[test]
    fn overflowing_paragraphs_carry_overlap_forward() {
        let chunker = TextChunker::new(50, 10);
        let first = "a".repeat(30);
        let second = "b".repeat(30);

        let chunks = chunker.chunk(&format!("{first}\n\n{second}"));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], first);
        assert_eq!(chunks[1], format!("{}\n\n{second}", "a".repeat(10)));
    }

    #[test]
    fn long_paragraph_is_split_on_sentences_within_limit() {
        let chunker = TextChunker::new(60, 10);
        let paragraph = "The reconciler watches the CR. It creates a deployment. \
                         It also manages the service account. Finally it updates status.";

        let chunks = chunker.chunk(paragraph);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 60), "{chunks:?}");
        assert!(chunks[0].starts_with("The reconciler watches the CR."));
    }

    #[test]
    fn unbroken_text_is_hard_split_on_char_boundaries() {
        let chunker = TextChunker::new(16, 4);
        let chunks = chunker.chunk(&"é".repeat(40));

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 16));
        assert_eq!(chunks.concat().chars().count(), 40);
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let chunker = TextChunker::new(10, 50);
        assert_eq!(chunker, TextChunker::new(10, 9));
    }
}
