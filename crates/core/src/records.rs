use crate::error::RecordError;
use crate::models::{ChatMessage, ChatSession, Collection, Document};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KEYSPACE: &'static str;
    const KIND: &'static str;

    fn id(&self) -> &str;
}

impl Record for Collection {
    const KEYSPACE: &'static str = "collections";
    const KIND: &'static str = "collection";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Document {
    const KEYSPACE: &'static str = "documents";
    const KIND: &'static str = "document";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ChatSession {
    const KEYSPACE: &'static str = "chat_sessions";
    const KIND: &'static str = "chat session";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ChatMessage {
    const KEYSPACE: &'static str = "chat_messages";
    const KIND: &'static str = "chat message";

    fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put<R: Record>(&self, record: &R) -> Result<(), RecordError>;

    async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, RecordError>;

    /// Returns whether a record was removed.
    async fn delete<R: Record>(&self, id: &str) -> Result<bool, RecordError>;

    /// Every record of the keyspace in insertion order.
    async fn list<R: Record>(&self) -> Result<Vec<R>, RecordError>;

    async fn require<R: Record>(&self, id: &str) -> Result<R, RecordError> {
        self.get(id).await?.ok_or_else(|| RecordError::NotFound {
            kind: R::KIND,
            id: id.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct JsonRecordStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn keyspace_path<R: Record>(&self) -> PathBuf {
        self.dir.join(format!("{}.json", R::KEYSPACE))
    }

    async fn load<R: Record>(&self) -> Result<Vec<R>, RecordError> {
        load_file(&self.keyspace_path::<R>()).await
    }

    async fn store<R: Record>(&self, records: &[R]) -> Result<(), RecordError> {
        let path = self.keyspace_path::<R>();
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(keyspace = R::KEYSPACE, records = records.len(), "records saved");
        Ok(())
    }
}

async fn load_file<R: Record>(path: &Path) -> Result<Vec<R>, RecordError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn put<R: Record>(&self, record: &R) -> Result<(), RecordError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<R>().await?;
        match records.iter_mut().find(|existing| existing.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.store(&records).await
    }

    async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, RecordError> {
        let _guard = self.write_lock.lock().await;
        Ok(self
            .load::<R>()
            .await?
            .into_iter()
            .find(|record| record.id() == id))
    }

    async fn delete<R: Record>(&self, id: &str) -> Result<bool, RecordError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load::<R>().await?;
        let before = records.len();
        records.retain(|record| record.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.store(&records).await?;
        Ok(true)
    }

    async fn list<R: Record>(&self) -> Result<Vec<R>, RecordError> {
        let _guard = self.write_lock.lock().await;
        self.load::<R>().await
    }
}
