use crate::error::IndexError;
use crate::models::{Chunk, ChunkMetadata, Scope};
use crate::store::{ScoredRecord, StoredChunk};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn scope_filter(scope: Option<&Scope>) -> Value {
    match scope {
        Some(scope) => json!({
            "must": [{ "key": scope.field(), "match": { "value": scope.value() } }]
        }),
        None => Value::Null,
    }
}

fn point_to_record(point: &Value) -> Option<ScoredRecord> {
    let id = match point.pointer("/id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let payload = point.pointer("/payload")?;
    let text_field = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let chunk = Chunk {
        text: text_field("text").unwrap_or_default(),
        metadata: ChunkMetadata {
            document_id: text_field("document_id")?,
            collection_id: text_field("collection_id"),
            filename: text_field("filename"),
            page_number: payload
                .get("page_number")
                .and_then(Value::as_u64)
                .and_then(|page| u32::try_from(page).ok())?,
        },
    };

    let vector = point
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Some(ScoredRecord {
        score: point.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
        record: StoredChunk { id, chunk, vector },
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: &[StoredChunk]) -> Result<(), IndexError> {
        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        record.vector.len(),
                        self.vector_size
                    )));
                }

                let metadata = &record.chunk.metadata;
                Ok(json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": {
                        "document_id": metadata.document_id,
                        "collection_id": metadata.collection_id,
                        "filename": metadata.filename,
                        "page_number": metadata.page_number,
                        "text": record.chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        debug!(points = records.len(), "qdrant upsert");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        if vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        let filter = scope_filter(scope);
        if !filter.is_null() {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().filter_map(point_to_record).collect())
    }

    async fn delete_by_document(&self, document_ids: &[String]) -> Result<(), IndexError> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [{ "key": "document_id", "match": { "any": document_ids } }]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        debug!(documents = document_ids.len(), "qdrant delete by document");
        Ok(())
    }
}
