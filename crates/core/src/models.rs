use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub pages: Vec<PageText>,
    pub used_ocr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn filename(&self) -> &str {
        self.metadata.filename.as_deref().unwrap_or("Unknown")
    }
}

pub fn attach_source(chunks: &mut [Chunk], collection_id: &str, filename: &str) {
    for chunk in chunks {
        chunk.metadata.collection_id = Some(collection_id.to_string());
        chunk.metadata.filename = Some(filename.to_string());
    }
}

/// Retrieval scope. A document scope is always narrower than a collection scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Document(String),
    Collection(String),
}

impl Scope {
    /// Builds a scope from optional ids; the document id wins when both are given.
    pub fn resolve(document_id: Option<&str>, collection_id: Option<&str>) -> Option<Self> {
        match (document_id, collection_id) {
            (Some(document_id), _) => Some(Self::Document(document_id.to_string())),
            (None, Some(collection_id)) => Some(Self::Collection(collection_id.to_string())),
            (None, None) => None,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            Self::Document(_) => "document_id",
            Self::Collection(_) => "collection_id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Document(id) | Self::Collection(id) => id,
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Self::Document(id) => metadata.document_id == *id,
            Self::Collection(id) => metadata.collection_id.as_deref() == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Similarity,
    #[default]
    Diversity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCandidate {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub filename: String,
    pub original_path: String,
    pub status: DocumentStatus,
    pub has_ocr: bool,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(collection_id: &str, filename: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            filename: filename.to_string(),
            original_path: String::new(),
            status: DocumentStatus::Uploaded,
            has_ocr: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub collection_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(collection_id: &str, title: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            title: title.unwrap_or(DEFAULT_SESSION_TITLE).to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: &str, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(document_id: &str, collection_id: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            document_id: document_id.to_string(),
            collection_id: collection_id.map(str::to_string),
            filename: None,
            page_number: 1,
        }
    }

    #[test]
    fn document_scope_wins_over_collection_scope() {
        let scope = Scope::resolve(Some("doc-1"), Some("col-1"));
        assert_eq!(scope, Some(Scope::Document("doc-1".to_string())));
        assert_eq!(Scope::resolve(None, None), None);
    }

    #[test]
    fn scope_matches_only_its_field() {
        let scope = Scope::Collection("col-1".to_string());
        assert!(scope.matches(&metadata("doc-9", Some("col-1"))));
        assert!(!scope.matches(&metadata("col-1", None)));

        let scope = Scope::Document("doc-1".to_string());
        assert!(scope.matches(&metadata("doc-1", Some("col-2"))));
        assert!(!scope.matches(&metadata("doc-2", Some("col-1"))));
    }

    #[test]
    fn document_status_serializes_lowercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&DocumentStatus::Ready)?, "\"ready\"");
        Ok(())
    }
}
