use crate::config::RetrievalSettings;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{Chunk, RetrievedCandidate, Scope, SearchStrategy};
use crate::store::{cosine_similarity, StoredChunk};
use crate::traits::{VectorIndex, VectorStore};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

pub struct SemanticIndex<S, E> {
    store: S,
    embedder: E,
    fetch_multiplier: usize,
    diversity_lambda: f32,
}

impl<S, E> SemanticIndex<S, E>
where
    S: VectorStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E, settings: RetrievalSettings) -> Self {
        Self {
            store,
            embedder,
            fetch_multiplier: settings.fetch_multiplier.max(1),
            diversity_lambda: settings.diversity_lambda,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S, E> VectorIndex for SemanticIndex<S, E>
where
    S: VectorStore,
    E: Embedder,
{
    async fn add(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let records: Vec<StoredChunk> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredChunk {
                id: Uuid::new_v4().to_string(),
                chunk: chunk.clone(),
                vector,
            })
            .collect();

        self.store.upsert(&records).await?;
        debug!(chunks = records.len(), "indexed chunks");
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        scope: Option<&Scope>,
        k: usize,
        strategy: SearchStrategy,
    ) -> Result<Vec<RetrievedCandidate>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;

        match strategy {
            SearchStrategy::Similarity => {
                let hits = self.store.query(&query_vector, scope, k).await?;
                Ok(hits.into_iter().map(|hit| hit.into_candidate()).collect())
            }
            SearchStrategy::Diversity => {
                let pool = self
                    .store
                    .query(&query_vector, scope, k.saturating_mul(self.fetch_multiplier))
                    .await?;
                let vectors: Vec<&[f32]> =
                    pool.iter().map(|hit| hit.record.vector.as_slice()).collect();
                let selected = maximal_marginal_relevance(&query_vector, &vectors, k, self.diversity_lambda);
                debug!(pool = pool.len(), selected = selected.len(), "diversity search");

                let mut pool: Vec<Option<_>> = pool.into_iter().map(Some).collect();
                Ok(selected
                    .into_iter()
                    .filter_map(|index| pool[index].take())
                    .map(|hit| hit.into_candidate())
                    .collect())
            }
        }
    }

    async fn delete(&self, document_ids: &[String]) -> Result<(), IndexError> {
        self.store.delete_by_document(document_ids).await
    }
}

/// Greedy MMR selection. Returns indices into `candidates` in selection order; each step
/// picks the candidate maximising `lambda * sim(query) - (1 - lambda) * max sim(selected)`.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let target = k.min(candidates.len());
    if target == 0 {
        return Vec::new();
    }

    let to_query: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query, candidate))
        .collect();

    let first = to_query
        .iter()
        .enumerate()
        .fold(0, |best, (index, score)| if *score > to_query[best] { index } else { best });

    let mut selected = vec![first];
    // highest similarity of each candidate to anything selected so far
    let mut redundancy: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(candidate, candidates[first]))
        .collect();

    while selected.len() < target {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_index = None;

        for (index, query_score) in to_query.iter().enumerate() {
            if selected.contains(&index) {
                continue;
            }
            let score = lambda * query_score - (1.0 - lambda) * redundancy[index];
            if score > best_score {
                best_score = score;
                best_index = Some(index);
            }
        }

        let Some(chosen) = best_index else {
            break;
        };
        selected.push(chosen);
        for (index, candidate) in candidates.iter().enumerate() {
            redundancy[index] = redundancy[index].max(cosine_similarity(candidate, candidates[chosen]));
        }
    }

    selected
}
