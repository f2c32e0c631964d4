//! WebSocket STT client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use colloquy_config::SttSettings;
use colloquy_core::{
    Error, Result, SttAdapter, SttControl, SttEvent, SttSessionConfig, SttStream,
};

use crate::messages::decode;
use crate::outage::OutageBuffer;

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_SECS: [u64; 5] = [0, 1, 2, 4, 8];
/// Buffered audio older than this is discarded instead of replayed.
const MAX_REPLAY_AGE: Duration = Duration::from_secs(3);

const AUDIO_CHANNEL: usize = 64;
const EVENT_CHANNEL: usize = 64;
const CONTROL_CHANNEL: usize = 8;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Streaming STT adapter over a duplex WebSocket.
pub struct StreamingStt {
    settings: SttSettings,
}

impl StreamingStt {
    pub fn new(settings: SttSettings) -> Self {
        Self { settings }
    }

    pub fn session_url(&self, config: &SttSessionConfig) -> Result<Url> {
        let mut url = Url::parse(&self.settings.url)
            .map_err(|e| Error::Config(format!("invalid STT url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.settings.model)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &config.sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("punctuate", &config.punctuate.to_string())
            .append_pair("interim_results", &config.interim_results.to_string())
            .append_pair("endpointing", &config.endpointing_ms.to_string());
        Ok(url)
    }
}

#[async_trait]
impl SttAdapter for StreamingStt {
    async fn open(&self, config: SttSessionConfig) -> Result<SttStream> {
        let url = self.session_url(&config)?;
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL);

        let session = SessionTask {
            url,
            api_key: self.settings.api_key.clone(),
            audio_rx,
            control_rx,
            events: event_tx,
            outage: OutageBuffer::for_sample_rate(config.sample_rate),
        };
        tokio::spawn(session.run());

        Ok(SttStream {
            audio: audio_tx,
            events: event_rx,
            control: control_tx,
        })
    }
}

struct SessionTask {
    url: Url,
    api_key: Option<String>,
    audio_rx: mpsc::Receiver<Bytes>,
    control_rx: mpsc::Receiver<SttControl>,
    events: mpsc::Sender<SttEvent>,
    outage: OutageBuffer,
}

impl SessionTask {
    async fn run(mut self) {
        let mut attempts: u32 = 0;
        'outer: loop {
            let delay = Duration::from_secs(BACKOFF_SECS[attempts.min(4) as usize]);
            if !delay.is_zero() && !self.wait_backoff(delay).await {
                return;
            }

            attempts += 1;
            let socket = match self.connect().await {
                Ok(socket) => socket,
                Err(e) => {
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        tracing::error!(error = %e, attempts, "STT reconnect budget exhausted");
                        let unavailable = Error::SttUnavailable { attempts };
                        let _ = self
                            .events
                            .send(SttEvent::Error {
                                message: unavailable.to_string(),
                                recoverable: false,
                            })
                            .await;
                        return;
                    }
                    tracing::warn!(error = %e, attempt = attempts, "STT connect failed");
                    continue 'outer;
                }
            };
            tracing::info!(attempt = attempts, "STT connected");
            attempts = 0;
            let (mut sink, mut incoming) = socket.split();

            let replay = self.outage.drain_fresh(MAX_REPLAY_AGE);
            if !replay.is_empty() {
                tracing::info!(frames = replay.len(), "replaying buffered audio");
            }
            for frame in replay {
                if sink.send(WsMessage::Binary(frame.to_vec())).await.is_err() {
                    continue 'outer;
                }
            }

            loop {
                tokio::select! {
                    frame = self.audio_rx.recv() => match frame {
                        Some(frame) => {
                            if sink
                                .send(WsMessage::Binary(frame.to_vec()))
                                .await
                                .is_err()
                            {
                                self.outage.push(frame);
                                tracing::warn!("STT send failed, reconnecting");
                                continue 'outer;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            return;
                        }
                    },
                    ctrl = self.control_rx.recv() => match ctrl {
                        Some(SttControl::Finalize) => {
                            let _ = sink
                                .send(WsMessage::Text("{\"type\":\"Finalize\"}".into()))
                                .await;
                        }
                        Some(SttControl::Close) | None => {
                            let _ = sink
                                .send(WsMessage::Text("{\"type\":\"CloseStream\"}".into()))
                                .await;
                            let _ = sink.close().await;
                            return;
                        }
                    },
                    message = incoming.next() => match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            for event in decode(&text) {
                                if self.events.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = sink.send(WsMessage::Pong(payload)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::warn!("STT socket closed by peer");
                            continue 'outer;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "STT socket error");
                            continue 'outer;
                        }
                    },
                }
            }
        }
    }

    /// Sleep out the backoff while still buffering inbound audio. Returns
    /// false when the session was closed during the wait.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                frame = self.audio_rx.recv() => match frame {
                    Some(frame) => self.outage.push(frame),
                    None => return false,
                },
                ctrl = self.control_rx.recv() => match ctrl {
                    Some(SttControl::Finalize) => {}
                    Some(SttControl::Close) | None => return false,
                },
            }
        }
    }

    async fn connect(&self) -> Result<Socket> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid STT request: {e}")))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Token {key}"))
                .map_err(|e| Error::Config(format!("invalid STT api key: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(ref resp)
                    if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
                {
                    Error::SttAuth
                }
                other => Error::SttStream {
                    message: other.to_string(),
                    recoverable: true,
                },
            })?;
        tracing::debug!(status = %response.status(), "STT handshake complete");
        Ok(socket)
    }
}
