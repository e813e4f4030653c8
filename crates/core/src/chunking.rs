use crate::config::ChunkingConfig;
use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, PageText};

/// Paragraph break, line break, space, then raw characters.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if config.chunk_overlap > config.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} is larger than chunk_size {}",
                config.chunk_overlap, config.chunk_size
            )));
        }

        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk(&self, pages: &[PageText], document_id: &str) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| {
                self.split_text(&page.text)
                    .into_iter()
                    .map(move |text| Chunk {
                        text,
                        metadata: ChunkMetadata {
                            document_id: document_id.to_string(),
                            collection_id: None,
                            filename: None,
                            page_number: page.number,
                        },
                    })
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];

        for (index, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                remaining = &separators[index + 1..];
                break;
            }
        }

        let splits = split_keeping_separator(text, separator);
        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) < self.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.push(split);
            } else {
                final_chunks.extend(self.split_recursive(&split, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily packs splits into windows, carrying up to `chunk_overlap` characters
    /// of trailing splits into the next window.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut lengths: Vec<usize> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let length = char_len(split);

            if total + length > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_splits(&current) {
                    docs.push(doc);
                }

                while total > self.chunk_overlap
                    || (total + length > self.chunk_size && total > 0)
                {
                    total -= lengths[0];
                    current.remove(0);
                    lengths.remove(0);
                }
            }

            current.push(split);
            lengths.push(length);
            total += length;
        }

        if let Some(doc) = join_splits(&current) {
            docs.push(doc);
        }

        docs
    }
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self {
            chunk_size: ChunkingConfig::default().chunk_size,
            chunk_overlap: ChunkingConfig::default().chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits on `separator`, keeping it attached to the start of the following piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        pieces.push(text[start..index].to_string());
        start = index;
    }
    pieces.push(text[start..].to_string());

    pieces.into_iter().filter(|piece| !piece.is_empty()).collect()
}

fn join_splits(splits: &[&str]) -> Option<String> {
    let joined = splits.concat();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> RecursiveSplitter {
        RecursiveSplitter::new(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
        .expect("config should be valid")
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn short_page_is_a_single_chunk() {
        let chunks = RecursiveSplitter::default().chunk(&[page(1, "Total revenue was 10M")], "doc-1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Total revenue was 10M");
        assert_eq!(chunks[0].metadata.document_id, "doc-1");
        assert_eq!(chunks[0].metadata.page_number, 1);
        assert_eq!(chunks[0].metadata.collection_id, None);
    }

    #[test]
    fn separator_is_kept_on_following_piece() {
        assert_eq!(
            split_keeping_separator("a\n\nb\n\nc", "\n\n"),
            vec!["a".to_string(), "\n\nb".to_string(), "\n\nc".to_string()]
        );
        assert_eq!(
            split_keeping_separator("\n\nlead", "\n\n"),
            vec!["\n\nlead".to_string()]
        );
    }

    #[test]
    fn paragraphs_are_preferred_over_words() {
        let text = "alpha beta gamma\n\ndelta epsilon zeta";
        let chunks = splitter(20, 0).split_text(text);
        assert_eq!(chunks, vec!["alpha beta gamma", "delta epsilon zeta"]);
    }

    #[test]
    fn windows_respect_size_and_overlap() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = splitter(15, 5).split_text(text);

        assert_eq!(
            chunks,
            vec!["one two three", "four five six", "six seven", "eight nine ten"]
        );
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 15));
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = splitter(10, 2).split_text(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn chunks_never_cross_page_boundaries() {
        let pages = vec![
            page(1, &"first page words ".repeat(20)),
            page(2, &"second page words ".repeat(20)),
        ];
        let chunks = splitter(60, 10).chunk(&pages, "doc-7");

        for chunk in &chunks {
            match chunk.metadata.page_number {
                1 => assert!(!chunk.text.contains("second")),
                2 => assert!(!chunk.text.contains("first")),
                other => panic!("unexpected page {other}"),
            }
        }
        assert!(chunks.iter().any(|chunk| chunk.metadata.page_number == 2));
    }

    #[test]
    fn chunking_is_deterministic() {
        let pages = vec![page(1, &"Lorem ipsum dolor sit amet.\n".repeat(300))];
        let splitter = splitter(400, 50);
        assert_eq!(splitter.chunk(&pages, "doc"), splitter.chunk(&pages, "doc"));
    }

    #[test]
    fn overlap_larger_than_size_is_rejected() {
        let result = RecursiveSplitter::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 11,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[test]
    fn whitespace_only_page_yields_nothing() {
        let chunks = RecursiveSplitter::default().chunk(&[page(3, " \n\n \n")], "doc");
        assert!(chunks.is_empty());
    }
}
