use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("no text could be extracted from {} (direct and OCR): {reason}", path.display())]
    ExtractionExhausted { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from reranker: {0}")]
    BackendResponse(String),

    #[error("reranker returned {returned} scores for {expected} passages")]
    ScoreCount { expected: usize, returned: usize },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation backend returned {status}: {details}")]
    BackendResponse { status: u16, details: String },

    #[error("generation stream failed: {0}")]
    Streaming(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed generation output: {0}")]
    MalformedGenerationOutput(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("indexing failed: {0}")]
    Indexing(#[from] IndexError),

    #[error(transparent)]
    Records(#[from] RecordError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Records(#[from] RecordError),

    #[error(transparent)]
    Answer(#[from] AnswerError),
}
