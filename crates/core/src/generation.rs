use crate::error::GenerationError;
use crate::traits::GenerationEngine;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";

pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiChatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: OPENAI_CHAT_MODEL.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct OpenAiChat {
    config: OpenAiChatConfig,
    client: Client,
}

impl OpenAiChat {
    pub fn new(config: OpenAiChatConfig) -> Result<Self, GenerationError> {
        if config.api_key.trim().is_empty() {
            return Err(GenerationError::MissingCredentials(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        // no overall timeout on the client: it would cut long streams short
        let client = Client::builder().connect_timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn body(&self, messages: &[PromptMessage], stream: bool) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages,
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::BackendResponse {
                status: status.as_u16(),
                details,
            });
        }
        Ok(response)
    }
}

async fn within<T, F>(limit: Duration, work: F) -> Result<T, GenerationError>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| GenerationError::Timeout(limit))?
}

#[async_trait]
impl GenerationEngine for OpenAiChat {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError> {
        let body = self.body(messages, false);
        let response = within(self.config.timeout, async {
            let response = self.post(&body).await?;
            Ok::<Value, GenerationError>(response.json().await?)
        })
        .await?;

        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GenerationError::MalformedGenerationOutput(
                    "completion has no message content".to_string(),
                )
            })
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
        let response = self.post(&self.body(messages, true)).await?;
        debug!(model = %self.config.model, "generation stream opened");

        let decoder = SseDecoder::new(response.bytes_stream().boxed());
        Ok(stream::unfold(decoder, |mut decoder| async move {
            decoder.next_token().await.map(|item| (item, decoder))
        })
        .boxed())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
    Malformed(String),
}

fn parse_sse_line(line: &str) -> Result<SseLine, GenerationError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let frame: Value = match serde_json::from_str(data) {
        Ok(frame) => frame,
        Err(error) => return Ok(SseLine::Malformed(error.to_string())),
    };

    if let Some(error) = frame.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GenerationError::Streaming(message));
    }

    match frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => Ok(SseLine::Token(content.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

struct SseDecoder<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
}

impl<S, B, E> SseDecoder<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    fn new(bytes: S) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    async fn next_token(&mut self) -> Option<Result<String, GenerationError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(chunk.as_ref());
                    while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
                        let line: Vec<u8> = self.buffer.drain(..=position).collect();
                        self.accept(&line);
                        if self.finished {
                            break;
                        }
                    }
                }
                Some(Err(error)) => {
                    self.finished = true;
                    self.pending
                        .push_back(Err(GenerationError::Streaming(error.to_string())));
                }
                None => {
                    let rest = std::mem::take(&mut self.buffer);
                    self.accept(&rest);
                    self.finished = true;
                }
            }
        }
    }

    fn accept(&mut self, line: &[u8]) {
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            Ok(SseLine::Token(token)) => self.pending.push_back(Ok(token)),
            Ok(SseLine::Done) => self.finished = true,
            Ok(SseLine::Skip) => {}
            Ok(SseLine::Malformed(error)) => warn!(error = %error, "skipping unreadable stream event"),
            Err(error) => {
                self.pending.push_back(Err(error));
                self.finished = true;
            }
        }
    }
}
