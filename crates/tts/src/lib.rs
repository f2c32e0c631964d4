//! Streaming TTS adapter.
//!
//! Streams synthesized audio for one sentence at a time over a persistent
//! pooled HTTP connection (one per process, pre-warmed on session start).
//! A single transient failure is retried; permanent failures surface to the
//! controller, which falls back to a text-only response for the turn.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use colloquy_config::TtsSettings;
use colloquy_core::{CancellationSignal, Error, Result, TtsAdapter, TtsChunk, TtsRequest};

/// Abort a sentence's synthesis if the first chunk does not arrive in time.
pub const FIRST_CHUNK_WATCHDOG: Duration = Duration::from_secs(5);

const CHANNEL_CAPACITY: usize = 32;

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
}

/// Streaming synthesis client.
pub struct StreamingTts {
    client: reqwest::Client,
    settings: TtsSettings,
}

impl StreamingTts {
    pub fn new(settings: TtsSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .pool_idle_timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    fn stream_url(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.settings.endpoint.trim_end_matches('/'),
            voice_id
        )
    }

    async fn execute(&self, text: &str, voice_id: &str) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(self.stream_url(voice_id))
            .json(&SynthesisBody { text });
        if let Some(key) = &self.settings.api_key {
            req = req.header("xi-api-key", key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| Error::TtsUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(Error::TtsAuth),
            429 => Err(Error::TtsQuota),
            500..=599 => Err(Error::TtsUnavailable(format!("{status}: {detail}"))),
            _ => Err(Error::TtsUnavailable(format!("{status}: {detail}"))),
        }
    }

    fn retryable(error: &Error) -> bool {
        matches!(error, Error::TtsUnavailable(_) | Error::TtsTimeout)
    }
}

#[async_trait]
impl TtsAdapter for StreamingTts {
    async fn stream_audio(
        &self,
        request: TtsRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<TtsChunk>>> {
        let voice_id = request
            .voice_id
            .as_deref()
            .unwrap_or(&self.settings.voice_id)
            .to_string();

        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            if cancel.is_set() {
                return Err(Error::TtsUnavailable("cancelled before start".into()));
            }
            match self.execute(&request.text, &voice_id).await {
                Ok(r) => break r,
                Err(e) if attempt == 1 && Self::retryable(&e) => {
                    tracing::warn!(error = %e, "TTS request failed, retrying once");
                }
                Err(e) => return Err(e),
            }
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut first_chunk_seen = false;

            loop {
                let next = if first_chunk_seen {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!("TTS stream cancelled");
                            return;
                        }
                        item = stream.next() => item,
                    }
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!("TTS stream cancelled before first chunk");
                            return;
                        }
                        timed = tokio::time::timeout(FIRST_CHUNK_WATCHDOG, stream.next()) => {
                            match timed {
                                Ok(item) => item,
                                Err(_) => {
                                    let _ = tx.send(Err(Error::TtsTimeout)).await;
                                    return;
                                }
                            }
                        }
                    }
                };

                match next {
                    Some(Ok(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        first_chunk_seen = true;
                        let chunk = TtsChunk {
                            audio: bytes,
                            is_final: false,
                        };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(Error::TtsUnavailable(e.to_string()))).await;
                        return;
                    }
                    None => {
                        let _ = tx
                            .send(Ok(TtsChunk {
                                audio: bytes::Bytes::new(),
                                is_final: true,
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn prewarm(&self) -> Result<()> {
        let url = format!("{}/v1/voices", self.settings.endpoint.trim_end_matches('/'));
        let mut req = self.client.get(url);
        if let Some(key) = &self.settings.api_key {
            req = req.header("xi-api-key", key);
        }
        let started = Instant::now();
        req.send()
            .await
            .map_err(|e| Error::TtsUnavailable(e.to_string()))?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "TTS connection prewarmed"
        );
        Ok(())
    }
}
