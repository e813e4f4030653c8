use crate::error::IndexError;
use crate::models::Scope;
use crate::store::{cosine_similarity, ScoredRecord, StoredChunk};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<StoredChunk>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path` if present; later writes go back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };
        debug!(path = %path.display(), records = records.len(), "opened vector snapshot");

        Ok(Self {
            records: RwLock::new(records),
            snapshot: Some(path),
        })
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn persist(&self, records: &[StoredChunk]) -> Result<(), IndexError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_snapshot(path, records).await
    }
}

async fn write_snapshot(path: &Path, records: &[StoredChunk]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, serde_json::to_vec(records)?).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, records: &[StoredChunk]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut stored = self.records.write().await;
        for record in records {
            match stored.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        debug!(upserted = records.len(), total = stored.len(), "memory store upsert");
        self.persist(&stored).await
    }

    async fn query(
        &self,
        vector: &[f32],
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let stored = self.records.read().await;
        let mut scored: Vec<ScoredRecord> = stored
            .iter()
            .filter(|record| scope.map_or(true, |scope| scope.matches(&record.chunk.metadata)))
            .map(|record| ScoredRecord {
                score: cosine_similarity(vector, &record.vector),
                record: record.clone(),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_by_document(&self, document_ids: &[String]) -> Result<(), IndexError> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let mut stored = self.records.write().await;
        let before = stored.len();
        stored.retain(|record| !document_ids.contains(&record.chunk.metadata.document_id));
        let removed = before - stored.len();
        debug!(removed, "memory store delete");

        if removed == 0 {
            return Ok(());
        }
        self.persist(&stored).await
    }
}
