//! OpenAI-compatible streaming backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use colloquy_config::LlmSettings;
use colloquy_core::{
    CancellationSignal, Error, GenerateRequest, LlmAdapter, Message, Result, StreamChunk,
};

use crate::sse::{parse_payload, SseLineBuffer};

/// Budget inside which a single transient-failure retry is allowed.
pub const RETRY_BUDGET: Duration = Duration::from_secs(5);
/// Abort the stream if no token arrives within this window.
pub const FIRST_TOKEN_WATCHDOG: Duration = Duration::from_secs(5);

const CHANNEL_CAPACITY: usize = 32;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Streaming chat-completions client with a persistent connection pool.
pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl OpenAiCompatLlm {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .pool_idle_timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.settings.endpoint.trim_end_matches('/'))
    }

    async fn execute(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let mut req = self.client.post(self.completions_url()).json(body);
        if let Some(key) = &self.settings.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(Error::LlmAuth),
            413 => Err(Error::LlmContextLength),
            400 if detail.contains("context_length") => Err(Error::LlmContextLength),
            429 | 500..=599 => Err(Error::LlmUnavailable(format!("{status}: {detail}"))),
            _ => Err(Error::LlmUnavailable(format!("{status}: {detail}"))),
        }
    }

    fn retryable(error: &Error) -> bool {
        matches!(error, Error::LlmUnavailable(_) | Error::LlmTimeout)
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatLlm {
    async fn stream_chunks(
        &self,
        request: GenerateRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let model = request.model.as_deref().unwrap_or(&self.settings.model);
        let body = ChatRequest {
            model,
            messages: &request.messages,
            stream: true,
            max_tokens: request.max_tokens.or(Some(self.settings.max_tokens)),
            temperature: request.temperature.or(Some(self.settings.temperature)),
        };

        let started = Instant::now();
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            if cancel.is_set() {
                return Err(Error::LlmUnavailable("cancelled before start".into()));
            }
            match self.execute(&body).await {
                Ok(r) => break r,
                Err(e) if attempt == 1 && Self::retryable(&e) && started.elapsed() < RETRY_BUDGET => {
                    tracing::warn!(error = %e, "LLM request failed, retrying once");
                }
                Err(e) => return Err(e),
            }
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let model = model.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut first_token_seen = false;

            loop {
                let next = if first_token_seen {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!(model = %model, "LLM stream cancelled");
                            return; // dropping `stream` closes the connection
                        }
                        item = stream.next() => item,
                    }
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!(model = %model, "LLM stream cancelled");
                            return;
                        }
                        timed = tokio::time::timeout(FIRST_TOKEN_WATCHDOG, stream.next()) => {
                            match timed {
                                Ok(item) => item,
                                Err(_) => {
                                    let _ = tx.send(Err(Error::LlmTimeout)).await;
                                    return;
                                }
                            }
                        }
                    }
                };

                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(Error::LlmUnavailable(e.to_string()))).await;
                        return;
                    }
                    None => {
                        // Stream closed without [DONE]; treat as completion.
                        let _ = tx.send(Ok(StreamChunk::final_chunk())).await;
                        return;
                    }
                };

                for payload in lines.push(&bytes) {
                    if let Some(chunk) = parse_payload(&payload) {
                        let is_final = chunk.is_final;
                        if !chunk.delta.is_empty() {
                            first_token_seen = true;
                        }
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                        if is_final {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn prewarm(&self) -> Result<()> {
        let url = format!("{}/models", self.settings.endpoint.trim_end_matches('/'));
        let mut req = self.client.get(url);
        if let Some(key) = &self.settings.api_key {
            req = req.bearer_auth(key);
        }
        let started = Instant::now();
        req.send()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "LLM connection prewarmed");
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}
