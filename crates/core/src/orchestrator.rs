use crate::config::{HistorySettings, RagSettings, RetrievalSettings};
use crate::error::{AnswerError, IndexError};
use crate::generation::{PromptMessage, TokenStream};
use crate::models::{ChatRole, ChatTurn, RetrievedCandidate, Scope, SearchStrategy};
use crate::rerank::Reranker;
use crate::traits::{CrossEncoder, GenerationEngine, VectorIndex};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Returned instead of a generated answer when retrieval finds nothing in scope.
pub const NO_RELEVANT_DOCUMENTS: &str =
    "I could not find any relevant documents to answer your question.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Generated,
    NoRelevantDocuments,
}

/// One item of a streamed answer. `Done` or `Error` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Chunk(String),
    Done(AnswerOutcome),
    Error(String),
}

pub struct AnswerOrchestrator<I, C, G> {
    index: Arc<I>,
    reranker: Reranker<C>,
    engine: Arc<G>,
    retrieval: RetrievalSettings,
    history: HistorySettings,
}

enum StreamState {
    Start {
        question: String,
        scope: Option<Scope>,
        history: Vec<ChatTurn>,
    },
    Generating(TokenStream),
    Finished,
}

impl<I, C, G> AnswerOrchestrator<I, C, G>
where
    I: VectorIndex,
    C: CrossEncoder,
    G: GenerationEngine,
{
    pub fn new(index: Arc<I>, reranker: Reranker<C>, engine: Arc<G>, settings: &RagSettings) -> Self {
        Self {
            index,
            reranker,
            engine,
            retrieval: settings.retrieval,
            history: settings.history,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        scope: Option<&Scope>,
        history: &[ChatTurn],
    ) -> Result<String, AnswerError> {
        let Some(messages) = self.prepare(question, scope, history).await? else {
            return Ok(NO_RELEVANT_DOCUMENTS.to_string());
        };

        let answer = self.engine.complete(&messages).await.map_err(|error| {
            error!(error = %error, "generation failed");
            error
        })?;
        Ok(answer)
    }

    /// Streams the answer as it is generated. Nothing is persisted here; the caller
    /// decides what to keep once the stream ends. Dropping the stream stops generation.
    pub fn stream_answer(
        &self,
        question: impl Into<String>,
        scope: Option<Scope>,
        history: Vec<ChatTurn>,
    ) -> BoxStream<'_, AnswerEvent> {
        let start = StreamState::Start {
            question: question.into(),
            scope,
            history,
        };

        stream::unfold(start, move |state| async move {
            match state {
                StreamState::Start {
                    question,
                    scope,
                    history,
                } => {
                    let prepared = self.prepare(&question, scope.as_ref(), &history).await;
                    let messages = match prepared {
                        Ok(Some(messages)) => messages,
                        Ok(None) => {
                            let done = AnswerEvent::Done(AnswerOutcome::NoRelevantDocuments);
                            return Some((done, StreamState::Finished));
                        }
                        Err(error) => {
                            return Some((AnswerEvent::Error(error.to_string()), StreamState::Finished))
                        }
                    };

                    match self.engine.stream(&messages).await {
                        Ok(tokens) => Some(next_event(tokens).await),
                        Err(error) => {
                            error!(error = %error, "generation stream could not start");
                            Some((AnswerEvent::Error(error.to_string()), StreamState::Finished))
                        }
                    }
                }
                StreamState::Generating(tokens) => Some(next_event(tokens).await),
                StreamState::Finished => None,
            }
        })
        .boxed()
    }

    /// Retrieves and reranks, then builds the prompt. `None` means nothing relevant was found.
    async fn prepare(
        &self,
        question: &str,
        scope: Option<&Scope>,
        history: &[ChatTurn],
    ) -> Result<Option<Vec<PromptMessage>>, AnswerError> {
        let candidates = self.retrieve(question, scope).await?;
        if candidates.is_empty() {
            warn!(?scope, "no documents found for question");
            return Ok(None);
        }

        let history = (!history.is_empty()).then(|| format_history(history, &self.history));
        let system = system_prompt(&format_context(&candidates), history.as_deref());
        Ok(Some(vec![
            PromptMessage::system(system),
            PromptMessage::user(question),
        ]))
    }

    async fn retrieve(
        &self,
        question: &str,
        scope: Option<&Scope>,
    ) -> Result<Vec<RetrievedCandidate>, IndexError> {
        let pool = self
            .index
            .search(question, scope, self.retrieval.pool_size, SearchStrategy::Diversity)
            .await
            .map_err(|error| {
                error!(error = %error, ?scope, "retrieval failed");
                error
            })?;
        let pool_size = pool.len();

        let kept = self
            .reranker
            .rerank(question, pool, self.retrieval.final_window)
            .await;
        info!(retrieved = pool_size, kept = kept.len(), "retrieved context");
        Ok(kept)
    }
}

async fn next_event(mut tokens: TokenStream) -> (AnswerEvent, StreamState) {
    loop {
        match tokens.next().await {
            Some(Ok(token)) if token.is_empty() => continue,
            Some(Ok(token)) => return (AnswerEvent::Chunk(token), StreamState::Generating(tokens)),
            Some(Err(error)) => {
                error!(error = %error, "generation stream failed");
                return (AnswerEvent::Error(error.to_string()), StreamState::Finished);
            }
            None => {
                info!("generation stream completed");
                return (AnswerEvent::Done(AnswerOutcome::Generated), StreamState::Finished);
            }
        }
    }
}

pub fn format_history(history: &[ChatTurn], settings: &HistorySettings) -> String {
    let start = history.len().saturating_sub(settings.max_turns);
    history[start..]
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            let content: String = turn.content.chars().take(settings.max_message_chars).collect();
            format!("{role}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_context(candidates: &[RetrievedCandidate]) -> String {
    candidates
        .iter()
        .map(|candidate| {
            format!(
                "Source: {} (Page {})\nContent: {}",
                candidate.chunk.filename(),
                candidate.chunk.metadata.page_number,
                candidate.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn system_prompt(context: &str, history: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a senior research analyst. Synthesize the technical documents in the context \
         into a structured, information-dense answer.\n\
         \n\
         ANSWER STRUCTURE:\n\
         - Open with a short paragraph that frames the topic.\n\
         - For summaries or key points, use a numbered list with a bold title per point and explain \
         the causes and consequences in each.\n\
         - Close with a short synthesis.\n\
         \n\
         GUIDELINES:\n\
         1. Citations (REQUIRED): every factual statement must be followed immediately by its \
         citation in the format [filename, Page: N]. When a paragraph draws on several pages, cite \
         each of them, e.g. [report.pdf, Page: 2] [report.pdf, Page: 5].\n\
         2. The context excerpts are labelled with 'Source:'. Take filenames and page numbers for \
         citations from those labels only.\n\
         3. If the context is entirely unrelated to the question, say that no specific information \
         was found. If the user asks what the document says or for a summary, summarize the context.\n",
    );

    if let Some(history) = history {
        prompt.push_str(
            "\nCONVERSATION HISTORY:\n\
             - The recent conversation is shown below, oldest first.\n\
             - Use it to resolve follow-up requests such as \"explain that further\".\n\
             \n\
             History:\n",
        );
        prompt.push_str(history);
        prompt.push('\n');
    }

    prompt.push_str("\nDocument context:\n");
    prompt.push_str(context);
    prompt
}
