use serde::{Deserialize, Serialize};

/// Total directly-extracted characters below which a PDF is treated as scanned.
pub const DEFAULT_OCR_TRIGGER_CHARS: usize = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 4_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 500;
pub const DEFAULT_RETRIEVAL_POOL: usize = 40;
pub const DEFAULT_FINAL_WINDOW: usize = 7;
pub const DEFAULT_FETCH_MULTIPLIER: usize = 10;
pub const DEFAULT_DIVERSITY_LAMBDA: f32 = 0.6;
/// A top rerank score at or below this is treated as a degenerate ranking.
pub const DEFAULT_RERANK_SCORE_FLOOR: f32 = 0.0001;
pub const DEFAULT_HISTORY_TURNS: usize = 10;
pub const DEFAULT_HISTORY_MESSAGE_CHARS: usize = 500;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub ocr_trigger_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            ocr_trigger_chars: DEFAULT_OCR_TRIGGER_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub pool_size: usize,
    pub final_window: usize,
    pub fetch_multiplier: usize,
    pub diversity_lambda: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_RETRIEVAL_POOL,
            final_window: DEFAULT_FINAL_WINDOW,
            fetch_multiplier: DEFAULT_FETCH_MULTIPLIER,
            diversity_lambda: DEFAULT_DIVERSITY_LAMBDA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub score_floor: f32,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            score_floor: DEFAULT_RERANK_SCORE_FLOOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub max_turns: usize,
    pub max_message_chars: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_HISTORY_TURNS,
            max_message_chars: DEFAULT_HISTORY_MESSAGE_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub extraction: ExtractionSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub rerank: RerankSettings,
    pub history: HistorySettings,
}
