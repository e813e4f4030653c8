pub mod chat;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod records;
pub mod rerank;
pub mod store;
pub mod stores;
pub mod traits;
pub mod translate;

pub use chat::{session_title, ChatService, WireEvent};
pub use chunking::RecursiveSplitter;
pub use config::{
    ChunkingConfig, ExtractionSettings, HistorySettings, RagSettings, RerankSettings,
    RetrievalSettings,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    AnswerError, ChatError, GenerationError, IndexError, IngestError, PipelineError, RecordError,
    RerankError,
};
pub use extractor::{Extractor, LopdfExtractor, PdfExtractor};
pub use generation::{OpenAiChat, OpenAiChatConfig, PromptMessage, PromptRole, TokenStream};
pub use index::{maximal_marginal_relevance, SemanticIndex};
pub use ingest::{discover_pdf_files, FolderReport, IngestionService, SkippedPdf};
pub use models::{
    ChatMessage, ChatRole, ChatSession, ChatTurn, Chunk, ChunkMetadata, Collection, Document,
    DocumentStatus, Extraction, PageText, RetrievedCandidate, Scope, SearchStrategy,
};
pub use ocr::{HttpOcr, OcrEndpointConfig, TesseractOcr};
pub use orchestrator::{AnswerEvent, AnswerOrchestrator, AnswerOutcome, NO_RELEVANT_DOCUMENTS};
pub use records::{JsonRecordStore, Record, RecordStore};
pub use rerank::{HttpCrossEncoder, Reranker, TermOverlapScorer};
pub use stores::{MemoryStore, QdrantStore};
pub use traits::{CrossEncoder, GenerationEngine, OcrEngine, VectorIndex, VectorStore};
pub use translate::{language_name, TranslationResult, Translator};
