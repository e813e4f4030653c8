use crate::config::RerankSettings;
use crate::error::RerankError;
use crate::models::RetrievedCandidate;
use crate::traits::CrossEncoder;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub struct Reranker<C> {
    encoder: C,
    settings: RerankSettings,
}

impl<C: CrossEncoder> Reranker<C> {
    pub fn new(encoder: C, settings: RerankSettings) -> Self {
        Self { encoder, settings }
    }

    /// A scoring error, or a top score at or below the configured floor, keeps the
    /// incoming order instead and returns its first `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedCandidate>,
        top_k: usize,
    ) -> Vec<RetrievedCandidate> {
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let passages: Vec<&str> = candidates
            .iter()
            .map(|candidate| candidate.chunk.text.as_str())
            .collect();

        let scores = match self.encoder.score(query, &passages).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                let error = RerankError::ScoreCount {
                    expected: candidates.len(),
                    returned: scores.len(),
                };
                warn!(error = %error, "reranking degraded, keeping retrieval order");
                return keep_order(candidates, top_k);
            }
            Err(error) => {
                warn!(error = %error, "reranking degraded, keeping retrieval order");
                return keep_order(candidates, top_k);
            }
        };

        let top_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if top_score <= self.settings.score_floor {
            warn!(
                top_score,
                floor = self.settings.score_floor,
                "rerank scores are degenerate, keeping retrieval order"
            );
            return keep_order(candidates, top_k);
        }

        let mut ranked: Vec<RetrievedCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| RetrievedCandidate { score, ..candidate })
            .collect();
        ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        ranked.truncate(top_k);
        debug!(kept = ranked.len(), top_score, "reranked candidates");
        ranked
    }
}

fn keep_order(mut candidates: Vec<RetrievedCandidate>, top_k: usize) -> Vec<RetrievedCandidate> {
    candidates.truncate(top_k);
    candidates
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Client for a `/rerank` endpoint such as text-embeddings-inference serving a
/// cross-encoder model. Accepts `{query, texts}` and answers `[{index, score}]`.
pub struct HttpCrossEncoder {
    endpoint: String,
    client: Client,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RerankError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/rerank", self.endpoint))
            .json(&json!({ "query": query, "texts": passages }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(RerankError::BackendResponse(format!("{status}: {details}")));
        }

        let hits: Vec<RerankHit> = response.json().await?;
        scores_by_index(hits, passages.len())
    }
}

fn scores_by_index(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>, RerankError> {
    if hits.len() != expected {
        return Err(RerankError::ScoreCount {
            expected,
            returned: hits.len(),
        });
    }

    let mut scores = vec![f32::NAN; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            RerankError::BackendResponse(format!("score index {} out of range", hit.index))
        })?;
        *slot = hit.score;
    }

    if scores.iter().any(|score| score.is_nan()) {
        return Err(RerankError::BackendResponse("duplicate score index".to_string()));
    }
    Ok(scores)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TermOverlapScorer;

impl TermOverlapScorer {
    pub fn score_one(&self, query: &str, passage: &str) -> f32 {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_terms = terms(passage);
        let matched = query_terms
            .iter()
            .filter(|term| passage_terms.contains(*term))
            .count();
        matched as f32 / query_terms.len() as f32
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| term.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl CrossEncoder for TermOverlapScorer {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        Ok(passages
            .iter()
            .map(|passage| self.score_one(query, passage))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    enum FakeEncoder {
        Fixed(Vec<f32>),
        Broken,
    }

    #[async_trait]
    impl CrossEncoder for FakeEncoder {
        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>, RerankError> {
            match self {
                Self::Fixed(scores) => Ok(scores.clone()),
                Self::Broken => Err(RerankError::BackendResponse("model not loaded".to_string())),
            }
        }
    }

    fn candidates(count: usize) -> Vec<RetrievedCandidate> {
        (0..count)
            .map(|index| RetrievedCandidate {
                chunk: Chunk {
                    text: format!("passage {index}"),
                    metadata: ChunkMetadata {
                        document_id: "doc-1".to_string(),
                        collection_id: Some("col-1".to_string()),
                        filename: Some("report.pdf".to_string()),
                        page_number: index as u32 + 1,
                    },
                },
                score: 1.0 - index as f32 / 100.0,
            })
            .collect()
    }

    fn texts(candidates: &[RetrievedCandidate]) -> Vec<&str> {
        candidates
            .iter()
            .map(|candidate| candidate.chunk.text.as_str())
            .collect()
    }

    #[tokio::test]
    async fn scoring_error_keeps_first_top_k() {
        let reranker = Reranker::new(FakeEncoder::Broken, RerankSettings::default());
        let pool = candidates(40);
        let expected: Vec<String> = pool[..7].iter().map(|c| c.chunk.text.clone()).collect();

        let kept = reranker.rerank("question", pool, 7).await;

        assert_eq!(texts(&kept), expected);
    }

    #[tokio::test]
    async fn scores_reorder_candidates() {
        let reranker = Reranker::new(
            FakeEncoder::Fixed(vec![0.1, 0.9, 0.5]),
            RerankSettings::default(),
        );

        let kept = reranker.rerank("question", candidates(3), 2).await;

        assert_eq!(texts(&kept), vec!["passage 1", "passage 2"]);
        assert!((kept[0].score - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn degenerate_scores_keep_retrieval_order() {
        let reranker = Reranker::new(
            FakeEncoder::Fixed(vec![0.0, 0.00005, -2.0, 0.0]),
            RerankSettings::default(),
        );

        let kept = reranker.rerank("question", candidates(4), 3).await;

        assert_eq!(texts(&kept), vec!["passage 0", "passage 1", "passage 2"]);
    }

    #[tokio::test]
    async fn score_floor_is_configurable() {
        let reranker = Reranker::new(
            FakeEncoder::Fixed(vec![0.2, 0.4]),
            RerankSettings { score_floor: 0.5 },
        );

        let kept = reranker.rerank("question", candidates(2), 2).await;

        assert_eq!(texts(&kept), vec!["passage 0", "passage 1"]);
    }

    #[tokio::test]
    async fn wrong_score_count_falls_back() {
        let reranker = Reranker::new(FakeEncoder::Fixed(vec![0.9]), RerankSettings::default());

        let kept = reranker.rerank("question", candidates(3), 5).await;

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].chunk.text, "passage 0");
    }

    #[tokio::test]
    async fn empty_pool_stays_empty() {
        let reranker = Reranker::new(FakeEncoder::Broken, RerankSettings::default());
        assert!(reranker.rerank("question", Vec::new(), 7).await.is_empty());
    }

    #[test]
    fn http_hits_are_reordered_by_index() -> Result<(), RerankError> {
        let hits = vec![
            RerankHit { index: 2, score: 0.7 },
            RerankHit { index: 0, score: 0.1 },
            RerankHit { index: 1, score: 0.4 },
        ];
        assert_eq!(scores_by_index(hits, 3)?, vec![0.1, 0.4, 0.7]);
        Ok(())
    }

    #[test]
    fn http_hits_with_gaps_are_rejected() {
        let hits = vec![RerankHit { index: 0, score: 0.1 }, RerankHit { index: 0, score: 0.2 }];
        assert!(scores_by_index(hits, 2).is_err());
        assert!(matches!(
            scores_by_index(Vec::new(), 1),
            Err(RerankError::ScoreCount { expected: 1, returned: 0 })
        ));
    }

    #[test]
    fn term_overlap_prefers_matching_passages() {
        let scorer = TermOverlapScorer;
        let relevant = scorer.score_one("What was net profit?", "Net profit was 2M");
        let unrelated = scorer.score_one("What was net profit?", "Total revenue was 10M");
        assert!(relevant > unrelated);
        assert!((0.0..=1.0).contains(&relevant));
    }
}
