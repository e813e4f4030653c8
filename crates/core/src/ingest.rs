use crate::chunking::RecursiveSplitter;
use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::error::{IngestError, PipelineError, RecordError};
use crate::extractor::{Extractor, PdfExtractor};
use crate::models::{attach_source, ChatMessage, ChatSession, Collection, Document, DocumentStatus};
use crate::records::RecordStore;
use crate::traits::{OcrEngine, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

const PDF_MAGIC: &[u8] = b"%PDF";

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub async fn create_collection<R: RecordStore>(
    records: &R,
    name: &str,
) -> Result<Collection, RecordError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RecordError::InvalidArgument(
            "collection name is empty".to_string(),
        ));
    }
    let collection = Collection::new(name);
    records.put(&collection).await?;
    info!(collection_id = %collection.id, name, "collection created");
    Ok(collection)
}

pub async fn list_collections<R: RecordStore>(records: &R) -> Result<Vec<Collection>, RecordError> {
    records.list().await
}

pub async fn list_documents<R: RecordStore>(
    records: &R,
    collection_id: &str,
) -> Result<Vec<Document>, RecordError> {
    records.require::<Collection>(collection_id).await?;
    let documents: Vec<Document> = records.list().await?;
    Ok(documents
        .into_iter()
        .filter(|document| document.collection_id == collection_id)
        .collect())
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderReport {
    /// Every stored upload, including those whose indexing failed.
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub struct IngestionService<D, O, I, R> {
    extractor: Extractor<D, O>,
    splitter: RecursiveSplitter,
    index: Arc<I>,
    records: Arc<R>,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
}

impl<D, O, I, R> IngestionService<D, O, I, R>
where
    D: PdfExtractor + 'static,
    O: OcrEngine,
    I: VectorIndex,
    R: RecordStore,
{
    pub fn new(
        extractor: Extractor<D, O>,
        splitter: RecursiveSplitter,
        index: Arc<I>,
        records: Arc<R>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            splitter,
            index,
            records,
            upload_dir: upload_dir.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub async fn create_collection(&self, name: &str) -> Result<Collection, RecordError> {
        create_collection(self.records.as_ref(), name).await
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>, RecordError> {
        list_collections(self.records.as_ref()).await
    }

    pub async fn list_documents(&self, collection_id: &str) -> Result<Vec<Document>, RecordError> {
        list_documents(self.records.as_ref(), collection_id).await
    }

    /// Stores the file and indexes it. Once the file is stored the call succeeds even if
    /// indexing fails; the outcome is recorded on the returned document's status.
    pub async fn upload(
        &self,
        collection_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Document, PipelineError> {
        self.records.require::<Collection>(collection_id).await?;

        let filename = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| IngestError::MissingFileName(filename.to_string()))?;

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(IngestError::InvalidArgument(format!("{filename} is not a PDF")).into());
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(IngestError::InvalidArgument(format!(
                "{filename} is {} bytes, the limit is {}",
                bytes.len(),
                self.max_upload_bytes
            ))
            .into());
        }

        let mut document = Document::new(collection_id, filename);
        let folder = self.upload_dir.join(collection_id);
        tokio::fs::create_dir_all(&folder).await.map_err(IngestError::from)?;
        let path = folder.join(format!("{}_{}", document.id, filename));
        tokio::fs::write(&path, bytes).await.map_err(IngestError::from)?;

        document.original_path = path.to_string_lossy().to_string();
        document.status = DocumentStatus::Processing;
        self.records.put(&document).await?;

        document.status = match self.index_document(&mut document).await {
            Ok(chunks) => {
                info!(document_id = %document.id, chunks, used_ocr = document.has_ocr, "document ready");
                DocumentStatus::Ready
            }
            Err(error) => {
                error!(document_id = %document.id, filename, error = %error, "document ingestion failed");
                DocumentStatus::Failed
            }
        };
        self.records.put(&document).await?;
        Ok(document)
    }

    async fn index_document(&self, document: &mut Document) -> Result<usize, PipelineError> {
        let extraction = self
            .extractor
            .extract(Path::new(&document.original_path))
            .await?;
        document.has_ocr = extraction.used_ocr;
        self.records.put(&*document).await?;

        let mut chunks = self.splitter.chunk(&extraction.pages, &document.id);
        attach_source(&mut chunks, &document.collection_id, &document.filename);
        self.index.add(&chunks).await?;
        Ok(chunks.len())
    }

    pub async fn ingest_folder(
        &self,
        collection_id: &str,
        folder: &Path,
    ) -> Result<FolderReport, PipelineError> {
        self.records.require::<Collection>(collection_id).await?;
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            ))
            .into());
        }

        let mut documents = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            match self.upload_file(collection_id, &path).await {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping pdf");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(FolderReport {
            documents,
            skipped_files,
        })
    }

    async fn upload_file(&self, collection_id: &str, path: &Path) -> Result<Document, PipelineError> {
        let bytes = tokio::fs::read(path).await.map_err(IngestError::from)?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        self.upload(collection_id, filename, &bytes).await
    }

    /// Vector delete, then file delete, then record delete. Only the record step can fail
    /// the call.
    pub async fn delete_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<(), RecordError> {
        let document: Document = self.records.require(document_id).await?;
        if document.collection_id != collection_id {
            return Err(RecordError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            });
        }

        if let Err(error) = self.index.delete(&[document.id.clone()]).await {
            error!(document_id, error = %error, "vector delete failed");
        }
        remove_file(Path::new(&document.original_path)).await;
        self.records.delete::<Document>(document_id).await?;

        info!(document_id, "document deleted");
        Ok(())
    }

    pub async fn delete_collection(&self, collection_id: &str) -> Result<(), RecordError> {
        self.records.require::<Collection>(collection_id).await?;

        let documents = self.list_documents(collection_id).await?;
        let document_ids: Vec<String> = documents.iter().map(|document| document.id.clone()).collect();

        if let Err(error) = self.index.delete(&document_ids).await {
            error!(collection_id, error = %error, "vector delete failed");
        }

        let folder = self.upload_dir.join(collection_id);
        match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %folder.display(), error = %error, "could not remove upload folder"),
        }

        for document_id in &document_ids {
            self.records.delete::<Document>(document_id).await?;
        }

        let sessions: Vec<ChatSession> = self.records.list().await?;
        let messages: Vec<ChatMessage> = self.records.list().await?;
        for session in sessions.iter().filter(|session| session.collection_id == collection_id) {
            for message in messages.iter().filter(|message| message.session_id == session.id) {
                self.records.delete::<ChatMessage>(&message.id).await?;
            }
            self.records.delete::<ChatSession>(&session.id).await?;
        }

        self.records.delete::<Collection>(collection_id).await?;
        info!(collection_id, documents = document_ids.len(), "collection deleted");
        Ok(())
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), error = %error, "could not remove stored file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, ExtractionSettings, RetrievalSettings};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::SemanticIndex;
    use crate::models::{ChatRole, PageText, Scope, SearchStrategy};
    use crate::records::JsonRecordStore;
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    const PDF_BYTES: &[u8] = b"%PDF-1.4\n%fake";

    /// Reads the stored upload as UTF-8 and treats `page-break` as a page separator.
    struct FakeDirect;

    impl PdfExtractor for FakeDirect {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let text = fs::read_to_string(path)?;
            let body = text.trim_start_matches("%PDF-1.4\n");
            Ok(body
                .split("page-break")
                .enumerate()
                .filter(|(_, page)| !page.trim().is_empty())
                .map(|(index, page)| PageText {
                    number: index as u32 + 1,
                    text: page.trim().to_string(),
                })
                .collect())
        }
    }

    struct SilentOcr;

    #[async_trait]
    impl OcrEngine for SilentOcr {
        async fn recognize(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(Vec::new())
        }
    }

    type LocalIndex = SemanticIndex<MemoryStore, CharacterNgramEmbedder>;
    type Service = IngestionService<FakeDirect, SilentOcr, LocalIndex, JsonRecordStore>;

    struct Fixture {
        _dir: TempDir,
        upload_dir: PathBuf,
        index: Arc<LocalIndex>,
        records: Arc<JsonRecordStore>,
        service: Service,
    }

    async fn fixture() -> Result<Fixture, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let upload_dir = dir.path().join("uploads");
        let index = Arc::new(SemanticIndex::new(
            MemoryStore::new(),
            CharacterNgramEmbedder::default(),
            RetrievalSettings::default(),
        ));
        let records = Arc::new(JsonRecordStore::open(dir.path().join("records")).await?);
        let service = IngestionService::new(
            Extractor::new(FakeDirect, SilentOcr, ExtractionSettings::default()),
            RecursiveSplitter::new(ChunkingConfig::default())?,
            Arc::clone(&index),
            Arc::clone(&records),
            &upload_dir,
        );

        Ok(Fixture {
            _dir: dir,
            upload_dir,
            index,
            records,
            service,
        })
    }

    fn pdf(pages: &[&str]) -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(pages.join("page-break").as_bytes());
        bytes
    }

    const REVENUE: &str = "Total revenue for the fiscal year was 10M across all regions.";
    const PROFIT: &str = "Net profit for the fiscal year was 2M after taxes and interest.";

    #[tokio::test]
    async fn collections_are_managed_from_records_alone() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let records = JsonRecordStore::open(dir.path()).await?;

        let finance = create_collection(&records, "  Finance ").await?;
        assert_eq!(finance.name, "Finance");
        assert!(matches!(
            create_collection(&records, "   ").await,
            Err(RecordError::InvalidArgument(_))
        ));

        let collections = list_collections(&records).await?;
        assert_eq!(collections.len(), 1);
        assert!(list_documents(&records, &finance.id).await?.is_empty());
        assert!(matches!(
            list_documents(&records, "missing").await,
            Err(RecordError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(PDF_BYTES))?;
        File::create(nested.join("b.PDF")).and_then(|mut file| file.write_all(PDF_BYTES))?;
        File::create(base.join("notes.txt")).and_then(|mut file| file.write_all(b"text"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn upload_indexes_pages_with_source_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("finance").await?;

        let document = fixture
            .service
            .upload(&collection.id, "report.pdf", &pdf(&[REVENUE, PROFIT]))
            .await?;

        assert_eq!(document.status, DocumentStatus::Ready);
        assert!(!document.has_ocr);
        let expected_path = fixture
            .upload_dir
            .join(&collection.id)
            .join(format!("{}_report.pdf", document.id));
        assert!(expected_path.exists());

        let scope = Scope::Collection(collection.id.clone());
        let hits = fixture
            .index
            .search("net profit", Some(&scope), 5, SearchStrategy::Similarity)
            .await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.metadata.page_number, 2);
        assert_eq!(hits[0].chunk.filename(), "report.pdf");
        assert_eq!(hits[0].chunk.metadata.document_id, document.id);

        let stored: Document = fixture.records.require(&document.id).await?;
        assert_eq!(stored.status, DocumentStatus::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn failed_extraction_keeps_the_upload() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("scans").await?;

        let document = fixture
            .service
            .upload(&collection.id, "scan.pdf", &pdf(&["~"]))
            .await?;

        assert_eq!(document.status, DocumentStatus::Failed);
        assert!(Path::new(&document.original_path).exists());
        let listed = fixture.service.list_documents(&collection.id).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, DocumentStatus::Failed);
        assert!(fixture.index.store().is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn upload_rejects_non_pdf_and_unknown_collection() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("finance").await?;

        let not_pdf = fixture
            .service
            .upload(&collection.id, "notes.pdf", b"plain text")
            .await;
        assert!(matches!(
            not_pdf,
            Err(PipelineError::Ingest(IngestError::InvalidArgument(_)))
        ));

        let unknown = fixture.service.upload("missing", "a.pdf", PDF_BYTES).await;
        assert!(matches!(
            unknown,
            Err(PipelineError::Records(RecordError::NotFound { .. }))
        ));

        let limited = fixture.service.with_max_upload_bytes(4);
        let oversized = limited.upload(&collection.id, "big.pdf", PDF_BYTES).await;
        assert!(matches!(
            oversized,
            Err(PipelineError::Ingest(IngestError::InvalidArgument(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_document_clears_vectors_file_and_record() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("finance").await?;
        let kept = fixture
            .service
            .upload(&collection.id, "kept.pdf", &pdf(&[REVENUE]))
            .await?;
        let removed = fixture
            .service
            .upload(&collection.id, "removed.pdf", &pdf(&[PROFIT]))
            .await?;

        fixture
            .service
            .delete_document(&collection.id, &removed.id)
            .await?;

        assert!(!Path::new(&removed.original_path).exists());
        assert_eq!(fixture.index.store().len().await, 1);
        let remaining = fixture.service.list_documents(&collection.id).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);

        let again = fixture.service.delete_document(&collection.id, &removed.id).await;
        assert!(matches!(again, Err(RecordError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn delete_collection_cascades() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let finance = fixture.service.create_collection("finance").await?;
        let other = fixture.service.create_collection("other").await?;
        fixture
            .service
            .upload(&finance.id, "report.pdf", &pdf(&[REVENUE]))
            .await?;
        fixture
            .service
            .upload(&other.id, "other.pdf", &pdf(&[PROFIT]))
            .await?;

        let session = ChatSession::new(&finance.id, None);
        fixture.records.put(&session).await?;
        fixture
            .records
            .put(&ChatMessage::new(&session.id, ChatRole::User, "hi"))
            .await?;

        fixture.service.delete_collection(&finance.id).await?;

        assert!(!fixture.upload_dir.join(&finance.id).exists());
        assert_eq!(fixture.index.store().len().await, 1);
        assert_eq!(fixture.records.list::<Document>().await?.len(), 1);
        assert!(fixture.records.list::<ChatSession>().await?.is_empty());
        assert!(fixture.records.list::<ChatMessage>().await?.is_empty());
        assert_eq!(fixture.service.list_collections().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_reports_skipped_files() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("finance").await?;
        let folder = tempdir()?;
        fs::create_dir(folder.path().join("q2"))?;
        fs::write(folder.path().join("q1.pdf"), pdf(&[REVENUE]))?;
        fs::write(folder.path().join("q2").join("q2.pdf"), pdf(&[PROFIT]))?;
        fs::write(folder.path().join("broken.pdf"), b"not a pdf at all")?;

        let report = fixture
            .service
            .ingest_folder(&collection.id, folder.path())
            .await?;

        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn folder_without_pdfs_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture().await?;
        let collection = fixture.service.create_collection("finance").await?;
        let folder = tempdir()?;

        let result = fixture
            .service
            .ingest_folder(&collection.id, folder.path())
            .await;

        assert!(result.is_err());
        Ok(())
    }
}
