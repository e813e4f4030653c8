use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use pdf_rag_core::generation::OPENAI_CHAT_MODEL;
use pdf_rag_core::ingest;
use pdf_rag_core::{
    AnswerEvent, AnswerOrchestrator, AnswerOutcome, CharacterNgramEmbedder, ChatService,
    CrossEncoder, Embedder, Extractor, HttpCrossEncoder, HttpOcr, IngestionService,
    JsonRecordStore, LopdfExtractor, MemoryStore, OcrEndpointConfig, OcrEngine, OpenAiChat,
    OpenAiChatConfig, OpenAiEmbedder, OpenAiEmbedderConfig, QdrantStore, RagSettings,
    RecursiveSplitter, Reranker, Scope, SemanticIndex, TermOverlapScorer, TesseractOcr,
    Translator, VectorStore, WireEvent, NO_RELEVANT_DOCUMENTS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Index = SemanticIndex<Box<dyn VectorStore>, Box<dyn Embedder>>;
type Encoder = Box<dyn CrossEncoder>;
type Orchestrator = AnswerOrchestrator<Index, Encoder, OpenAiChat>;
type Ingestion = IngestionService<LopdfExtractor, Box<dyn OcrEngine>, Index, JsonRecordStore>;
type Chat = ChatService<Index, Encoder, OpenAiChat, JsonRecordStore>;

const RERANK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "pdf-rag", version, about = "Ask grounded questions about PDF collections")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Args)]
struct Options {
    /// Directory for the record files and the local vector snapshot
    #[arg(long, env = "PDF_RAG_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory where uploaded PDFs are stored, one folder per collection
    #[arg(long, env = "PDF_RAG_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// JSON file overriding chunking, retrieval, rerank and history tunables
    #[arg(long, env = "PDF_RAG_SETTINGS")]
    settings: Option<PathBuf>,

    #[arg(long, value_enum, env = "PDF_RAG_VECTOR_BACKEND", default_value_t = VectorBackend::Memory)]
    vector_backend: VectorBackend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "pdf_chunks")]
    qdrant_collection: String,

    #[arg(long, value_enum, env = "PDF_RAG_EMBEDDER", default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Chat model used for answers and translation
    #[arg(long, env = "OPENAI_MODEL", default_value = OPENAI_CHAT_MODEL)]
    model: String,

    /// Cross-encoder `/rerank` endpoint; the local term-overlap scorer is used when unset
    #[arg(long, env = "RERANKER_URL")]
    reranker_url: Option<String>,

    /// OCR backend for scanned PDFs; `http` reads LLM_OCR_ENDPOINT and LLM_OCR_API_KEY
    #[arg(long, value_enum, env = "PDF_RAG_OCR", default_value_t = OcrBackend::Tesseract)]
    ocr: OcrBackend,
}

#[derive(Clone, Copy, ValueEnum)]
enum VectorBackend {
    Memory,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Openai,
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum OcrBackend {
    Tesseract,
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Create, list or delete collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Ingest a PDF file, or every PDF under a folder, into a collection.
    Ingest {
        #[arg(long)]
        collection: String,
        /// PDF file or folder searched recursively.
        path: PathBuf,
    },
    /// List the documents of a collection with their status.
    Documents {
        #[arg(long)]
        collection: String,
    },
    /// Remove a document with its vectors and stored file.
    DeleteDocument {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        document: String,
    },
    /// Answer one question from a collection or a single document.
    Ask {
        #[arg(long, required_unless_present = "document")]
        collection: Option<String>,
        /// Narrows retrieval to one document.
        #[arg(long)]
        document: Option<String>,
        /// Print tokens as they arrive.
        #[arg(long, default_value_t = false)]
        stream: bool,
        question: String,
    },
    /// Conversational sessions over a collection.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
    /// Translate text, optionally polishing it first.
    Translate {
        #[arg(long, default_value = "auto")]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = false)]
        improve: bool,
        text: String,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    Create { name: String },
    List,
    /// Deletes the collection with its documents, vectors and chat sessions.
    Delete { id: String },
}

#[derive(Subcommand)]
enum ChatAction {
    New {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        title: Option<String>,
    },
    Sessions {
        #[arg(long)]
        collection: String,
    },
    Send {
        #[arg(long)]
        session: String,
        #[arg(long, default_value_t = false)]
        stream: bool,
        message: String,
    },
    History {
        #[arg(long)]
        session: String,
    },
    Delete {
        #[arg(long)]
        session: String,
    },
}

/// Components shared by every command, built once per process.
struct Runtime {
    options: Options,
    settings: RagSettings,
    records: Arc<JsonRecordStore>,
}

impl Runtime {
    async fn open(options: Options) -> anyhow::Result<Self> {
        let settings = load_settings(options.settings.as_deref()).await?;
        let records = Arc::new(JsonRecordStore::open(options.data_dir.join("records")).await?);
        Ok(Self {
            options,
            settings,
            records,
        })
    }

    async fn index(&self) -> anyhow::Result<Arc<Index>> {
        let embedder: Box<dyn Embedder> = match self.options.embedder {
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
            EmbedderKind::Openai => {
                let mut config = OpenAiEmbedderConfig::new(self.api_key());
                config.base_url = self.options.openai_base_url.clone();
                Box::new(OpenAiEmbedder::new(config)?)
            }
        };

        let store: Box<dyn VectorStore> = match self.options.vector_backend {
            VectorBackend::Memory => {
                Box::new(MemoryStore::open(self.options.data_dir.join("vectors.json")).await?)
            }
            VectorBackend::Qdrant => {
                let store = QdrantStore::new(
                    self.options.qdrant_url.clone(),
                    self.options.qdrant_collection.clone(),
                    embedder.dimensions(),
                )?;
                store.ensure_collection().await?;
                Box::new(store)
            }
        };

        Ok(Arc::new(SemanticIndex::new(
            store,
            embedder,
            self.settings.retrieval,
        )))
    }

    fn ocr(&self) -> anyhow::Result<Box<dyn OcrEngine>> {
        match self.options.ocr {
            OcrBackend::Tesseract => Ok(Box::new(TesseractOcr::default())),
            OcrBackend::Http => {
                let config = OcrEndpointConfig::from_env()
                    .context("LLM_OCR_ENDPOINT must be set for the http OCR backend")?;
                Ok(Box::new(HttpOcr::new(config)))
            }
        }
    }

    fn engine(&self) -> anyhow::Result<Arc<OpenAiChat>> {
        let mut config = OpenAiChatConfig::new(self.api_key());
        config.base_url = self.options.openai_base_url.clone();
        config.model = self.options.model.clone();
        Ok(Arc::new(OpenAiChat::new(config)?))
    }

    fn api_key(&self) -> String {
        self.options.openai_api_key.clone().unwrap_or_default()
    }

    async fn ingestion(&self) -> anyhow::Result<Ingestion> {
        let extractor = Extractor::new(LopdfExtractor, self.ocr()?, self.settings.extraction);
        let splitter = RecursiveSplitter::new(self.settings.chunking)?;
        Ok(IngestionService::new(
            extractor,
            splitter,
            self.index().await?,
            Arc::clone(&self.records),
            self.options.upload_dir.clone(),
        ))
    }

    async fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let encoder: Encoder = match self.options.reranker_url.as_deref() {
            Some(endpoint) => Box::new(HttpCrossEncoder::new(endpoint, RERANK_TIMEOUT)?),
            None => Box::new(TermOverlapScorer),
        };
        let reranker = Reranker::new(encoder, self.settings.rerank);
        Ok(AnswerOrchestrator::new(
            self.index().await?,
            reranker,
            self.engine()?,
            &self.settings,
        ))
    }

    async fn chat(&self) -> anyhow::Result<Chat> {
        Ok(ChatService::new(
            Arc::new(self.orchestrator().await?),
            Arc::clone(&self.records),
            self.settings.history,
        ))
    }
}

async fn load_settings(path: Option<&Path>) -> anyhow::Result<RagSettings> {
    let Some(path) = path else {
        return Ok(RagSettings::default());
    };
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading settings file {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing settings file {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let Cli { command, options } = cli;
    let runtime = Runtime::open(options).await?;

    match command {
        Command::Collection { action } => run_collection(&runtime, action).await?,
        Command::Ingest { collection, path } => {
            let ingestion = runtime.ingestion().await?;
            if path.is_dir() {
                let report = ingestion.ingest_folder(&collection, &path).await?;
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                for document in &report.documents {
                    print_document(document);
                }
                println!(
                    "{} documents stored, {} skipped",
                    report.documents.len(),
                    report.skipped_files.len()
                );
            } else {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let filename = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .with_context(|| format!("{} has no file name", path.display()))?;
                let document = ingestion.upload(&collection, filename, &bytes).await?;
                print_document(&document);
            }
        }
        Command::Documents { collection } => {
            for document in ingest::list_documents(runtime.records.as_ref(), &collection).await? {
                print_document(&document);
            }
        }
        Command::DeleteDocument {
            collection,
            document,
        } => {
            let ingestion = runtime.ingestion().await?;
            ingestion.delete_document(&collection, &document).await?;
            println!("deleted document {document}");
        }
        Command::Ask {
            collection,
            document,
            stream,
            question,
        } => {
            let Some(scope) = Scope::resolve(document.as_deref(), collection.as_deref()) else {
                bail!("either --collection or --document is required");
            };
            let orchestrator = runtime.orchestrator().await?;

            if stream {
                print_answer_stream(orchestrator.stream_answer(question, Some(scope), Vec::new()))
                    .await?;
            } else {
                let answer = orchestrator.answer(&question, Some(&scope), &[]).await?;
                println!("{answer}");
            }
        }
        Command::Chat { action } => run_chat(&runtime, action).await?,
        Command::Translate {
            from,
            to,
            improve,
            text,
        } => {
            let translator = Translator::new(runtime.engine()?)?;
            let result = translator.translate(&text, &from, &to, improve).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

async fn run_collection(runtime: &Runtime, action: CollectionAction) -> anyhow::Result<()> {
    let records = runtime.records.as_ref();
    match action {
        CollectionAction::Create { name } => {
            let collection = ingest::create_collection(records, &name).await?;
            println!("{}  {}", collection.id, collection.name);
        }
        CollectionAction::List => {
            for collection in ingest::list_collections(records).await? {
                println!(
                    "{}  {}  created={}",
                    collection.id,
                    collection.name,
                    collection.created_at.to_rfc3339()
                );
            }
        }
        CollectionAction::Delete { id } => {
            runtime.ingestion().await?.delete_collection(&id).await?;
            println!("deleted collection {id}");
        }
    }
    Ok(())
}

async fn run_chat(runtime: &Runtime, action: ChatAction) -> anyhow::Result<()> {
    let chat = runtime.chat().await?;
    match action {
        ChatAction::New { collection, title } => {
            let session = chat.create_session(&collection, title.as_deref()).await?;
            println!("{}  {}", session.id, session.title);
        }
        ChatAction::Sessions { collection } => {
            for session in chat.list_sessions(&collection).await? {
                println!("{}  {}", session.id, session.title);
            }
        }
        ChatAction::Send {
            session,
            stream,
            message,
        } => {
            if stream {
                let mut events = chat.send_message_stream(&session, &message).await?;
                let mut stdout = tokio::io::stdout();
                while let Some(event) = events.next().await {
                    match event {
                        WireEvent::Chunk { chunk } => {
                            stdout.write_all(chunk.as_bytes()).await?;
                            stdout.flush().await?;
                        }
                        WireEvent::Done {
                            message_id, notice, ..
                        } => {
                            if let Some(notice) = notice {
                                stdout.write_all(notice.as_bytes()).await?;
                            }
                            stdout.write_all(b"\n").await?;
                            stdout.flush().await?;
                            info!(message_id = %message_id, "reply stored");
                        }
                        WireEvent::Error { error } => bail!("answer stream failed: {error}"),
                    }
                }
            } else {
                let reply = chat.send_message(&session, &message).await?;
                println!("{}", reply.content);
            }
        }
        ChatAction::History { session } => {
            for message in chat.messages(&session).await? {
                println!(
                    "[{}] {:?}: {}",
                    message.created_at.to_rfc3339(),
                    message.role,
                    message.content
                );
            }
        }
        ChatAction::Delete { session } => {
            chat.delete_session(&session).await?;
            println!("deleted session {session}");
        }
    }
    Ok(())
}

async fn print_answer_stream(
    mut events: futures::stream::BoxStream<'_, AnswerEvent>,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            AnswerEvent::Chunk(text) => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            AnswerEvent::Done(AnswerOutcome::NoRelevantDocuments) => {
                stdout.write_all(NO_RELEVANT_DOCUMENTS.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            AnswerEvent::Done(AnswerOutcome::Generated) => stdout.write_all(b"\n").await?,
            AnswerEvent::Error(message) => bail!("answer stream failed: {message}"),
        }
    }
    stdout.flush().await?;
    Ok(())
}

fn print_document(document: &pdf_rag_core::Document) {
    println!(
        "{}  {:?}  ocr={}  {}",
        document.id, document.status, document.has_ocr, document.filename
    );
}
