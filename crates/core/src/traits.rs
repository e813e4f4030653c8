use crate::generation::{PromptMessage, TokenStream};
use crate::store::{ScoredRecord, StoredChunk};
use crate::{
    Chunk, GenerationError, IndexError, IngestError, PageText, RerankError, RetrievedCandidate,
    Scope, SearchStrategy,
};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: &[StoredChunk]) -> Result<(), IndexError>;

    /// Nearest records by cosine similarity, best first, with their vectors.
    async fn query(
        &self,
        vector: &[f32],
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError>;

    /// Removes every record whose `document_id` is in `document_ids`. Unknown ids are a no-op.
    async fn delete_by_document(&self, document_ids: &[String]) -> Result<(), IndexError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    async fn search(
        &self,
        query: &str,
        scope: Option<&Scope>,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Vec<RetrievedCandidate>, IndexError>;

    async fn delete(&self, document_ids: &[String]) -> Result<(), IndexError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One relevance score per passage, in passage order. Higher is more relevant.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError>;
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError>;

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError>;
}

// Runtime-selected backends are boxed by the binary.

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Box<T> {
    async fn upsert(&self, records: &[StoredChunk]) -> Result<(), IndexError> {
        (**self).upsert(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        (**self).query(vector, scope, limit).await
    }

    async fn delete_by_document(&self, document_ids: &[String]) -> Result<(), IndexError> {
        (**self).delete_by_document(document_ids).await
    }
}

#[async_trait]
impl<T: OcrEngine + ?Sized> OcrEngine for Box<T> {
    async fn recognize(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        (**self).recognize(path).await
    }
}

#[async_trait]
impl<T: CrossEncoder + ?Sized> CrossEncoder for Box<T> {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        (**self).score(query, passages).await
    }
}

#[async_trait]
impl<T: GenerationEngine + ?Sized> GenerationEngine for Box<T> {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError> {
        (**self).complete(messages).await
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
        (**self).stream(messages).await
    }
}
