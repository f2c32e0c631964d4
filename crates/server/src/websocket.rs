//! WebSocket connection handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use colloquy_core::{AudioChunk, AudioFormat, SttSessionConfig};
use colloquy_pipeline::{ServerEvent, SessionEvent, TurnController};

use crate::messages::{ClientMessage, ServerMessage};
use crate::session::Session;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, "websocket connected");

    let (mut sink, mut reader) = socket.split();

    // The session's STT stream; without it there is no voice session.
    let stt_stream = match state.stt.open(SttSessionConfig::default()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to open STT stream");
            let msg = ServerMessage::error(e.code(), e.to_string(), e.recoverable());
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = sink.send(Message::Text(json)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let queue = state.settings.server.outbound_queue;
    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(queue);
    let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(queue);

    let (controller, handles) = TurnController::new(
        session_id.clone(),
        state.settings.clone(),
        stt_stream,
        state.llm.clone(),
        state.tts.clone(),
        state.retriever.clone(),
        state.writer.clone(),
        event_tx,
    );

    let session = match state
        .sessions
        .register(session_id.clone(), handles.events.clone())
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection");
            let msg = ServerMessage::error(e.code(), e.to_string(), e.recoverable());
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = sink.send(Message::Text(json)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let controller_task = tokio::spawn(controller.run());

    // Pre-warm adapter connections so the first turn does not pay the
    // handshake cost. Failures are logged, never fatal.
    {
        let llm = state.llm.clone();
        let tts = state.tts.clone();
        tokio::spawn(async move {
            if let Err(e) = llm.prewarm().await {
                tracing::warn!(error = %e, "LLM prewarm failed");
            }
            if let Err(e) = tts.prewarm().await {
                tracing::warn!(error = %e, "TTS prewarm failed");
            }
        });
    }

    // Controller events become wire messages through the same bounded
    // outbound queue the reader uses for direct replies.
    let forward_out = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        let mut event_rx = event_rx;
        while let Some(event) = event_rx.recv().await {
            if forward_out.send(ServerMessage::from(event)).await.is_err() {
                break;
            }
        }
    });

    let last_pong = Arc::new(Mutex::new(Instant::now()));

    // Writer: drains the outbound queue and emits heartbeat pings.
    let heartbeat = Duration::from_secs(state.settings.server.heartbeat_interval_secs);
    let pong_deadline = Duration::from_secs(state.settings.server.heartbeat_timeout_secs);
    let writer_pong = last_pong.clone();
    let writer_task = tokio::spawn(async move {
        let mut out_rx = out_rx;
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                message = out_rx.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode server message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if writer_pong.lock().elapsed() > pong_deadline {
                        tracing::warn!("heartbeat timed out, closing socket");
                        break;
                    }
                    let ping = match serde_json::to_string(&ServerMessage::Ping {}) {
                        Ok(json) => json,
                        Err(_) => continue,
                    };
                    if sink.send(Message::Text(ping)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader loop on this task.
    while let Some(incoming) = reader.next().await {
        match incoming {
            Ok(Message::Text(text)) => {
                session.touch();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        let disconnect = matches!(message, ClientMessage::Disconnect {});
                        handle_client_message(message, &session, &out_tx, &last_pong).await;
                        if disconnect {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "unparseable client message");
                        let msg = ServerMessage::error(
                            "WS_INVALID_MESSAGE",
                            format!("could not parse message: {e}"),
                            true,
                        );
                        let _ = out_tx.send(msg).await;
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                // Raw PCM frames are accepted directly.
                session.touch();
                match AudioChunk::new(Bytes::from(data), AudioFormat::Pcm, 16_000) {
                    Ok(chunk) => {
                        let _ = session.events.send(SessionEvent::AudioChunk(chunk)).await;
                    }
                    Err(e) => {
                        let msg = ServerMessage::error(e.code(), e.to_string(), true);
                        let _ = out_tx.send(msg).await;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket read error");
                break;
            }
        }
    }

    // Teardown.
    let _ = session.events.send(SessionEvent::Disconnect).await;
    state.sessions.remove(&session_id);
    let _ = tokio::time::timeout(Duration::from_secs(2), controller_task).await;
    forward_task.abort();
    writer_task.abort();
    tracing::info!(session_id = %session_id, "websocket closed");
}

async fn handle_client_message(
    message: ClientMessage,
    session: &Session,
    out_tx: &mpsc::Sender<ServerMessage>,
    last_pong: &Arc<Mutex<Instant>>,
) {
    match message {
        ClientMessage::Connect {} => {
            let _ = out_tx
                .send(ServerMessage::session_ready(session.id.clone()))
                .await;
        }
        ClientMessage::AudioChunk {
            audio,
            format,
            sample_rate,
        } => match BASE64.decode(&audio) {
            Ok(bytes) => match AudioChunk::new(Bytes::from(bytes), format, sample_rate) {
                Ok(chunk) => {
                    let _ = session.events.send(SessionEvent::AudioChunk(chunk)).await;
                }
                Err(e) => {
                    let msg = ServerMessage::error(e.code(), e.to_string(), true);
                    let _ = out_tx.send(msg).await;
                }
            },
            Err(e) => {
                let msg = ServerMessage::error(
                    "WS_INVALID_AUDIO",
                    format!("invalid base64 audio: {e}"),
                    true,
                );
                let _ = out_tx.send(msg).await;
            }
        },
        ClientMessage::TextInput { text } => {
            let _ = session.events.send(SessionEvent::TextInput { text }).await;
        }
        ClientMessage::Interrupt { .. } => {
            let _ = session.events.send(SessionEvent::Interrupt).await;
        }
        ClientMessage::PlaybackComplete { .. } => {
            let _ = session.events.send(SessionEvent::PlaybackComplete).await;
        }
        ClientMessage::UpdateSettings(patch) => {
            let _ = session
                .events
                .send(SessionEvent::SettingsUpdate(patch))
                .await;
        }
        ClientMessage::GetHistory {} => {
            let _ = session.events.send(SessionEvent::HistoryRequest).await;
        }
        ClientMessage::GetTelemetry {} => {
            let _ = session.events.send(SessionEvent::TelemetryRequest).await;
        }
        ClientMessage::Ping {} => {
            // Client-initiated ping; nothing to do beyond activity tracking.
        }
        ClientMessage::Pong {} => {
            *last_pong.lock() = Instant::now();
        }
        ClientMessage::Disconnect {} => {
            // The reader loop breaks after dispatching this.
        }
    }
}
