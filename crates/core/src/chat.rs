use crate::config::HistorySettings;
use crate::error::{ChatError, RecordError};
use crate::models::{ChatMessage, ChatRole, ChatSession, ChatTurn, Collection, Scope, DEFAULT_SESSION_TITLE};
use crate::orchestrator::{AnswerEvent, AnswerOrchestrator, AnswerOutcome, NO_RELEVANT_DOCUMENTS};
use crate::records::RecordStore;
use crate::traits::{CrossEncoder, GenerationEngine, VectorIndex};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

const TITLE_CHARS: usize = 30;

/// Server-push event of a streamed chat reply. Exactly one `Done` or `Error` ends a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEvent {
    Chunk {
        chunk: String,
    },
    Done {
        done: bool,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    Error {
        error: String,
    },
}

impl WireEvent {
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

enum Relay<'a> {
    Streaming {
        events: BoxStream<'a, AnswerEvent>,
        answer: String,
        session_id: String,
    },
    Finished,
}

/// Chat sessions over a collection. Persists the user's message up front and the
/// assistant's reply only once it is complete.
pub struct ChatService<I, C, G, R> {
    orchestrator: Arc<AnswerOrchestrator<I, C, G>>,
    records: Arc<R>,
    history: HistorySettings,
}

impl<I, C, G, R> ChatService<I, C, G, R>
where
    I: VectorIndex,
    C: CrossEncoder,
    G: GenerationEngine,
    R: RecordStore,
{
    pub fn new(
        orchestrator: Arc<AnswerOrchestrator<I, C, G>>,
        records: Arc<R>,
        history: HistorySettings,
    ) -> Self {
        Self {
            orchestrator,
            records,
            history,
        }
    }

    pub async fn create_session(
        &self,
        collection_id: &str,
        title: Option<&str>,
    ) -> Result<ChatSession, RecordError> {
        self.records.require::<Collection>(collection_id).await?;
        let session = ChatSession::new(collection_id, title);
        self.records.put(&session).await?;
        Ok(session)
    }

    pub async fn list_sessions(&self, collection_id: &str) -> Result<Vec<ChatSession>, RecordError> {
        let sessions: Vec<ChatSession> = self.records.list().await?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.collection_id == collection_id)
            .collect())
    }

    pub async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, RecordError> {
        self.records.require::<ChatSession>(session_id).await?;
        let mut messages: Vec<ChatMessage> = self
            .records
            .list::<ChatMessage>()
            .await?
            .into_iter()
            .filter(|message| message.session_id == session_id)
            .collect();
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), RecordError> {
        for message in self.messages(session_id).await? {
            self.records.delete::<ChatMessage>(&message.id).await?;
        }
        self.records.delete::<ChatSession>(session_id).await?;
        Ok(())
    }

    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<ChatMessage, ChatError> {
        let (session, history) = self.record_question(session_id, content).await?;
        let scope = Scope::Collection(session.collection_id.clone());

        let answer = self
            .orchestrator
            .answer(content, Some(&scope), &history)
            .await?;

        Ok(self.record_answer(&session.id, answer).await?)
    }

    /// Relays the answer as wire events. The reply is stored only after the answer stream
    /// has finished without error; dropping the returned stream stores nothing.
    pub async fn send_message_stream(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<BoxStream<'_, WireEvent>, ChatError> {
        let (session, history) = self.record_question(session_id, content).await?;
        let scope = Scope::Collection(session.collection_id.clone());

        let relay = Relay::Streaming {
            events: self.orchestrator.stream_answer(content, Some(scope), history),
            answer: String::new(),
            session_id: session.id,
        };

        Ok(stream::unfold(relay, move |relay| async move {
            let Relay::Streaming {
                mut events,
                mut answer,
                session_id,
            } = relay
            else {
                return None;
            };

            match events.next().await? {
                AnswerEvent::Chunk(text) => {
                    answer.push_str(&text);
                    let next = Relay::Streaming {
                        events,
                        answer,
                        session_id,
                    };
                    Some((WireEvent::Chunk { chunk: text }, next))
                }
                AnswerEvent::Done(outcome) => {
                    drop(events);
                    let notice = match outcome {
                        AnswerOutcome::Generated => None,
                        AnswerOutcome::NoRelevantDocuments => {
                            answer = NO_RELEVANT_DOCUMENTS.to_string();
                            Some(NO_RELEVANT_DOCUMENTS.to_string())
                        }
                    };
                    let event = match self.record_answer(&session_id, answer).await {
                        Ok(message) => WireEvent::Done {
                            done: true,
                            message_id: message.id,
                            notice,
                        },
                        Err(error) => {
                            error!(session_id = %session_id, error = %error, "could not store streamed answer");
                            WireEvent::Error {
                                error: error.to_string(),
                            }
                        }
                    };
                    Some((event, Relay::Finished))
                }
                AnswerEvent::Error(message) => {
                    error!(session_id = %session_id, error = %message, "streamed answer failed");
                    Some((WireEvent::Error { error: message }, Relay::Finished))
                }
            }
        })
        .boxed())
    }

    /// Stores the user's message, names an untitled session after it and returns the
    /// session with its recent history, this message included.
    async fn record_question(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<(ChatSession, Vec<ChatTurn>), RecordError> {
        if content.trim().is_empty() {
            return Err(RecordError::InvalidArgument("message is empty".to_string()));
        }

        let mut session: ChatSession = self.records.require(session_id).await?;
        self.records
            .put(&ChatMessage::new(session_id, ChatRole::User, content))
            .await?;

        if session.title == DEFAULT_SESSION_TITLE {
            session.title = session_title(content);
            self.records.put(&session).await?;
        }

        let messages = self.messages(session_id).await?;
        let start = messages.len().saturating_sub(self.history.max_turns);
        let history = messages[start..].iter().map(ChatMessage::turn).collect();
        Ok((session, history))
    }

    async fn record_answer(&self, session_id: &str, answer: String) -> Result<ChatMessage, RecordError> {
        let message = ChatMessage::new(session_id, ChatRole::Assistant, answer);
        self.records.put(&message).await?;
        info!(session_id, message_id = %message.id, "assistant reply stored");
        Ok(message)
    }
}

pub fn session_title(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_CHARS).collect();
    if content.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    title
}
