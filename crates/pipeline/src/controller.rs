//! The per-session turn controller.
//!
//! One task owns every piece of mutable session state and multiplexes four
//! event sources: client messages, STT events, the silence timer, and the
//! per-turn LLM/TTS workers. Workers are spawned per speculation round and
//! tagged with the turn's generation; events from a cancelled generation
//! are dropped on arrival, so late sentences or audio chunks from a dead
//! speculation can never reach the wire.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use colloquy_config::{SessionSettings, Settings, SettingsPatch};
use colloquy_core::llm_types::estimate_tokens;
use colloquy_core::{
    AudioChunk, CancellationSignal, Error, GenerateRequest, LlmAdapter, Retriever, SttEvent,
    SttSender, SttStream, TtsAdapter, TtsRequest, TurnLatencies, TurnOutcome, TurnRecord,
    TurnState,
};
use colloquy_persistence::RecordWriter;

use crate::audio::InboundAudioRing;
use crate::correction::contains_correction_marker;
use crate::debounce::AdaptiveDebounce;
use crate::events::{ServerEvent, SessionEvent, TurnEvent};
use crate::history::ConversationHistory;
use crate::prompt::build_system_prompt;
use crate::segment::SentenceSegmenter;
use crate::silence::SilenceTimer;
use crate::state::StateMachine;
use crate::telemetry::SessionTelemetry;
use crate::transcript::TranscriptBuffer;

const TIMER_CHANNEL: usize = 8;
const TURN_EVENT_CHANNEL: usize = 256;
const SESSION_EVENT_CHANNEL: usize = 64;

/// Handles the server layer keeps after spawning a controller.
pub struct ControllerHandles {
    pub events: mpsc::Sender<SessionEvent>,
}

struct ActiveTurn {
    id: String,
    generation: u64,
    started_at: Instant,
    started_at_ms: i64,
    llm_cancel: CancellationSignal,
    tts_cancel: CancellationSignal,
    /// Sentences generated during SPECULATIVE, held off the wire.
    hold: Vec<String>,
    agent_text: String,
    llm_done: bool,
    tts_failed: bool,
    tts_queue: Option<mpsc::UnboundedSender<String>>,
    chunk_index: u64,
    audio_started: bool,
    tokens_prompt: u64,
    tokens_completion: u64,
    was_interrupted: bool,
    waiting_for_playback: bool,
    turn_complete_sent: bool,
    final_at: Option<Instant>,
    commit_at: Option<Instant>,
    first_sentence_at: Option<Instant>,
    first_audio_at: Option<Instant>,
}

impl ActiveTurn {
    fn new(id: String, generation: u64) -> Self {
        Self {
            id,
            generation,
            started_at: Instant::now(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            llm_cancel: CancellationSignal::new(),
            tts_cancel: CancellationSignal::new(),
            hold: Vec::new(),
            agent_text: String::new(),
            llm_done: false,
            tts_failed: false,
            tts_queue: None,
            chunk_index: 0,
            audio_started: false,
            tokens_prompt: 0,
            tokens_completion: 0,
            was_interrupted: false,
            waiting_for_playback: false,
            turn_complete_sent: false,
            final_at: None,
            commit_at: None,
            first_sentence_at: None,
            first_audio_at: None,
        }
    }
}

pub struct TurnController {
    session_id: String,
    settings: Arc<Settings>,
    session: SessionSettings,

    machine: StateMachine,
    buffer: TranscriptBuffer,
    timer: SilenceTimer,
    debounce: AdaptiveDebounce,
    telemetry: SessionTelemetry,
    ring: InboundAudioRing,
    history: ConversationHistory,

    stt_tx: SttSender,
    stt_events: mpsc::Receiver<SttEvent>,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    retriever: Option<Arc<dyn Retriever>>,
    writer: RecordWriter,
    outbound: mpsc::Sender<ServerEvent>,

    events_rx: mpsc::Receiver<SessionEvent>,
    timer_tx: mpsc::Sender<u64>,
    timer_rx: mpsc::Receiver<u64>,
    turn_tx: mpsc::Sender<TurnEvent>,
    turn_rx: mpsc::Receiver<TurnEvent>,

    turn: Option<ActiveTurn>,
    turn_seq: u64,
    generation_counter: u64,
    shutdown: bool,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        settings: Arc<Settings>,
        stt: SttStream,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<dyn TtsAdapter>,
        retriever: Option<Arc<dyn Retriever>>,
        writer: RecordWriter,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> (Self, ControllerHandles) {
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_CHANNEL);
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL);
        let (turn_tx, turn_rx) = mpsc::channel(TURN_EVENT_CHANNEL);
        let (stt_tx, stt_events) = stt.split();

        let session = SessionSettings::from_turn_settings(&settings.turn);
        let history = ConversationHistory::new(settings.turn.history_turns);
        let ring = InboundAudioRing::new(settings.server.audio_ring_bytes);

        let controller = Self {
            session_id,
            settings,
            session,
            machine: StateMachine::new(),
            buffer: TranscriptBuffer::new(),
            timer: SilenceTimer::new(),
            debounce: AdaptiveDebounce::new(),
            telemetry: SessionTelemetry::new(),
            ring,
            history,
            stt_tx,
            stt_events,
            llm,
            tts,
            retriever,
            writer,
            outbound,
            events_rx,
            timer_tx,
            timer_rx,
            turn_tx,
            turn_rx,
            turn: None,
            turn_seq: 0,
            generation_counter: 0,
            shutdown: false,
        };
        (controller, ControllerHandles { events: events_tx })
    }

    /// Run the session actor until disconnect.
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "turn controller started");
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_session_event(event).await,
                    None => self.shutdown = true,
                },
                Some(event) = self.stt_events.recv() => {
                    self.handle_stt_event(event).await;
                }
                Some(generation) = self.timer_rx.recv() => {
                    self.on_silence_timeout(generation).await;
                }
                Some(event) = self.turn_rx.recv() => {
                    self.handle_turn_event(event).await;
                }
            }
            if self.shutdown {
                break;
            }
        }
        self.teardown().await;
        tracing::info!(session_id = %self.session_id, "turn controller stopped");
    }

    async fn teardown(&mut self) {
        self.timer.cancel();
        if let Some(turn) = &self.turn {
            turn.llm_cancel.set();
            turn.tts_cancel.set();
        }
        self.turn = None;
        self.stt_tx.close().await;
        if self.machine.current() != TurnState::Idle {
            let _ = self.machine.transition(TurnState::Idle);
        }
    }

    async fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            tracing::debug!("outbound channel closed, dropping event");
        }
    }

    async fn send_error(&self, error: &Error) {
        self.send(ServerEvent::error(error)).await;
    }

    /// Perform a guarded transition and announce it.
    async fn transition(&mut self, to: TurnState) {
        match self.machine.transition(to) {
            Ok(record) => {
                self.send(ServerEvent::StateChange {
                    from: record.from,
                    to: record.to,
                })
                .await;
            }
            Err(e) => {
                // Transitions are pre-checked against the current state, so
                // this is a programming error and fatal for the session.
                tracing::error!(error = %e, "invalid transition, closing session");
                self.send_error(&e).await;
                self.shutdown = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AudioChunk(chunk) => self.on_audio_chunk(chunk).await,
            SessionEvent::TextInput { text } => self.on_text_input(text).await,
            SessionEvent::Interrupt => self.on_interrupt().await,
            SessionEvent::PlaybackComplete => self.on_playback_complete().await,
            SessionEvent::SettingsUpdate(patch) => self.on_settings_update(patch),
            SessionEvent::TelemetryRequest => {
                let snapshot = self.telemetry.snapshot(self.session.debounce_ms);
                self.send(ServerEvent::Telemetry(snapshot)).await;
            }
            SessionEvent::HistoryRequest => {
                self.send(ServerEvent::History {
                    turns: self.history.turns(),
                })
                .await;
            }
            SessionEvent::Disconnect => {
                tracing::info!(session_id = %self.session_id, "client disconnected");
                self.shutdown = true;
            }
        }
    }

    async fn on_audio_chunk(&mut self, chunk: AudioChunk) {
        let dropped = self.ring.push(chunk.data.clone());
        if dropped > 0 {
            tracing::warn!(dropped, "inbound audio ring overflow");
            self.telemetry.add_buffer_overflows(dropped);
        }

        match self.machine.current() {
            TurnState::Idle => {
                self.transition(TurnState::Listening).await;
            }
            TurnState::Speaking => {
                // A new audio frame while the agent speaks is a barge-in.
                self.barge_in("audio frame during playback").await;
            }
            _ => {}
        }

        self.stt_tx.send(chunk.data).await;
    }

    async fn on_text_input(&mut self, text: String) {
        if self.machine.current() == TurnState::Idle {
            self.transition(TurnState::Listening).await;
        }
        self.handle_stt_event(SttEvent::Final {
            text,
            confidence: 1.0,
        })
        .await;
    }

    async fn on_interrupt(&mut self) {
        match self.machine.current() {
            TurnState::Speaking | TurnState::Committed => {
                self.barge_in("explicit interrupt").await;
            }
            TurnState::Speculative => {
                self.cancel_speculation("explicit interrupt").await;
            }
            state => {
                tracing::debug!(%state, "interrupt ignored");
            }
        }
    }

    async fn on_playback_complete(&mut self) {
        let waiting = self
            .turn
            .as_ref()
            .map(|t| t.waiting_for_playback)
            .unwrap_or(false);
        if self.machine.current() != TurnState::Speaking || !waiting {
            tracing::debug!("playback_complete ignored, not waiting for playback");
            return;
        }
        self.transition(TurnState::Idle).await;
        self.close_turn(TurnOutcome::Completed, false).await;
    }

    fn on_settings_update(&mut self, patch: SettingsPatch) {
        tracing::info!(?patch, "applying settings update");
        self.session.apply(patch);
    }

    // ------------------------------------------------------------------
    // STT events
    // ------------------------------------------------------------------

    async fn handle_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Partial { text, confidence } => self.on_partial(text, confidence).await,
            SttEvent::Final { text, confidence } => self.on_final(text, confidence).await,
            SttEvent::Endpoint => self.on_endpoint().await,
            SttEvent::Error {
                message,
                recoverable,
            } => {
                let error = Error::SttStream {
                    message,
                    recoverable,
                };
                tracing::warn!(error = %error, "stt stream error");
                self.send_error(&error).await;
            }
        }
    }

    async fn on_partial(&mut self, text: String, confidence: f32) {
        self.buffer.set_partial(&text);
        self.send(ServerEvent::TranscriptPartial {
            text: text.clone(),
            confidence,
        })
        .await;

        match self.machine.current() {
            TurnState::Speculative => {
                let reason = if contains_correction_marker(&text) {
                    "correction marker in partial"
                } else {
                    "new speech during speculation"
                };
                self.cancel_speculation(reason).await;
            }
            TurnState::Committed => {
                self.barge_in("speech before audio started").await;
            }
            TurnState::Speaking => {
                self.barge_in("speech during playback").await;
            }
            _ => {}
        }
    }

    async fn on_final(&mut self, text: String, confidence: f32) {
        match self.machine.current() {
            TurnState::Committed => {
                // The user kept talking through the debounce; the final that
                // proves it is consumed by the barge-in.
                self.barge_in("final transcript before audio started").await;
                return;
            }
            TurnState::Speaking => {
                self.barge_in("final transcript during playback").await;
                return;
            }
            TurnState::Speculative => {
                let reason = if contains_correction_marker(&text) {
                    "correction marker in final"
                } else {
                    "additional final during speculation"
                };
                self.cancel_speculation(reason).await;
                // Fall through to normal LISTENING handling below.
            }
            TurnState::Listening => {}
            state => {
                tracing::warn!(%state, "final transcript ignored");
                return;
            }
        }

        if self.buffer.is_locked() {
            tracing::warn!("final transcript while buffer locked, dropping");
            return;
        }
        if let Err(e) = self.buffer.append_final(&text, confidence) {
            tracing::warn!(error = %e, "failed to append final");
            return;
        }
        self.send(ServerEvent::TranscriptFinal {
            text: text.clone(),
            confidence,
        })
        .await;

        // Create the turn on the first final of this utterance.
        if self.turn.is_none() {
            self.generation_counter += 1;
            let id = format!("{}_{}", self.session_id, self.turn_seq);
            self.turn_seq += 1;
            self.turn = Some(ActiveTurn::new(id, self.generation_counter));
        }
        let debounce = Duration::from_millis(self.session.debounce_ms as u64);
        if let Some(turn) = self.turn.as_mut() {
            turn.final_at = Some(Instant::now());
        }

        self.transition(TurnState::Speculative).await;
        self.timer.start(debounce, self.timer_tx.clone());
        self.start_speculative_llm().await;
    }

    async fn on_endpoint(&mut self) {
        // The service confirmed end-of-utterance: shrink the remaining wait.
        if self.machine.current() == TurnState::Speculative {
            let short = Duration::from_millis(self.settings.turn.endpoint_debounce_ms as u64);
            tracing::debug!(debounce_ms = short.as_millis() as u64, "endpoint hint, short debounce");
            self.timer.start(short, self.timer_tx.clone());
        }
    }

    // ------------------------------------------------------------------
    // Speculative execution
    // ------------------------------------------------------------------

    async fn start_speculative_llm(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        let user_text = self.buffer.complete_text();
        if user_text.is_empty() {
            return;
        }

        let history_messages = self.history.messages();
        turn.tokens_prompt = estimate_tokens(&self.settings.llm.system_prompt)
            + history_messages
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum::<u64>()
            + estimate_tokens(&user_text);

        let generation = turn.generation;
        let cancel = turn.llm_cancel.clone();
        let llm = self.llm.clone();
        let retriever = self.retriever.clone();
        let rag = self.settings.rag.clone();
        let base_prompt = self.settings.llm.system_prompt.clone();
        let model = self.session.llm_model.clone();
        let stream_timeout = self.settings.turn.llm_stream_timeout();
        let turn_tx = self.turn_tx.clone();

        tokio::spawn(async move {
            // Wait policy: retrieval first, under its hard budget, then the
            // LLM request with any snippets spliced into the system prompt.
            let snippets = match retriever {
                Some(retriever) if rag.enabled => {
                    let budget = Duration::from_millis(rag.timeout_ms);
                    match tokio::time::timeout(budget, retriever.retrieve(&user_text, rag.top_k))
                        .await
                    {
                        Ok(Ok(snippets)) => snippets,
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "retrieval failed, continuing without context");
                            Vec::new()
                        }
                        Err(_) => {
                            tracing::warn!("retrieval timed out, continuing without context");
                            Vec::new()
                        }
                    }
                }
                _ => Vec::new(),
            };

            if cancel.is_set() {
                return;
            }

            let mut request = GenerateRequest::new(build_system_prompt(&base_prompt, &snippets));
            for message in history_messages {
                request = request.with_message(message);
            }
            request = request.with_user_message(&user_text);
            if let Some(model) = model {
                request = request.with_model(model);
            }

            let mut chunks = match llm.stream_chunks(request, cancel.clone()).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    if !cancel.is_set() {
                        let _ = turn_tx.send(TurnEvent::LlmFailed { generation, error }).await;
                    }
                    return;
                }
            };

            let mut segmenter = SentenceSegmenter::new();
            let mut sentences = 0usize;
            let deadline = Instant::now() + stream_timeout;

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => {
                        let _ = turn_tx
                            .send(TurnEvent::LlmFailed { generation, error: Error::LlmTimeout })
                            .await;
                        return;
                    }
                    chunk = chunks.recv() => chunk,
                };
                match chunk {
                    Some(Ok(chunk)) => {
                        for sentence in segmenter.push(&chunk.delta) {
                            sentences += 1;
                            let _ = turn_tx
                                .send(TurnEvent::Sentence {
                                    generation,
                                    text: sentence,
                                })
                                .await;
                        }
                        if chunk.is_final {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        if !cancel.is_set() {
                            let _ = turn_tx.send(TurnEvent::LlmFailed { generation, error }).await;
                        }
                        return;
                    }
                    None => break,
                }
            }

            if let Some(tail) = segmenter.flush() {
                sentences += 1;
                let _ = turn_tx
                    .send(TurnEvent::Sentence {
                        generation,
                        text: tail,
                    })
                    .await;
            }
            let _ = turn_tx
                .send(TurnEvent::LlmComplete {
                    generation,
                    sentences,
                })
                .await;
        });
    }

    async fn on_silence_timeout(&mut self, generation: u64) {
        if generation != self.timer.generation() {
            tracing::debug!(generation, "stale silence timer fire ignored");
            return;
        }
        if self.machine.current() != TurnState::Speculative || self.turn.is_none() {
            tracing::debug!("silence timer fired outside speculation, ignoring");
            return;
        }

        self.transition(TurnState::Committed).await;
        self.buffer.lock();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<String>();
        let Some((turn_generation, tts_cancel)) = self.turn.as_mut().map(|turn| {
            turn.commit_at = Some(Instant::now());
            (turn.generation, turn.tts_cancel.clone())
        }) else {
            return;
        };
        self.spawn_tts_worker(turn_generation, queue_rx, tts_cancel);

        if let Some(turn) = self.turn.as_mut() {
            for sentence in turn.hold.drain(..) {
                let _ = queue_tx.send(sentence);
            }
            if turn.llm_done {
                // The whole response arrived during the debounce; the queue
                // is complete as-is, dropping the sender closes it.
                drop(queue_tx);
            } else {
                turn.tts_queue = Some(queue_tx);
            }
        }
    }

    fn spawn_tts_worker(
        &self,
        generation: u64,
        mut queue: mpsc::UnboundedReceiver<String>,
        cancel: CancellationSignal,
    ) {
        let tts = self.tts.clone();
        let voice_id = self.session.voice_id.clone();
        let turn_tx = self.turn_tx.clone();

        tokio::spawn(async move {
            while let Some(sentence) = queue.recv().await {
                if cancel.is_set() {
                    return;
                }
                let mut request = TtsRequest::new(sentence);
                if let Some(voice) = &voice_id {
                    request = request.with_voice(voice.clone());
                }
                let mut chunks = match tts.stream_audio(request, cancel.clone()).await {
                    Ok(chunks) => chunks,
                    Err(error) => {
                        if !cancel.is_set() {
                            let _ = turn_tx.send(TurnEvent::TtsFailed { generation, error }).await;
                        }
                        return;
                    }
                };
                while let Some(item) = chunks.recv().await {
                    if cancel.is_set() {
                        return;
                    }
                    match item {
                        Ok(chunk) => {
                            if chunk.is_final {
                                break;
                            }
                            if chunk.audio.is_empty() {
                                continue;
                            }
                            let _ = turn_tx
                                .send(TurnEvent::TtsChunk {
                                    generation,
                                    audio: chunk.audio,
                                })
                                .await;
                        }
                        Err(error) => {
                            if !cancel.is_set() {
                                let _ =
                                    turn_tx.send(TurnEvent::TtsFailed { generation, error }).await;
                            }
                            return;
                        }
                    }
                }
            }
            if !cancel.is_set() {
                let _ = turn_tx.send(TurnEvent::TtsFinished { generation }).await;
            }
        });
    }

    // ------------------------------------------------------------------
    // Worker events
    // ------------------------------------------------------------------

    fn is_current(&self, generation: u64) -> bool {
        self.turn
            .as_ref()
            .map(|t| t.generation == generation)
            .unwrap_or(false)
    }

    async fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::Sentence { generation, text } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_llm_sentence(text).await;
            }
            TurnEvent::LlmComplete {
                generation,
                sentences,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_llm_complete(sentences).await;
            }
            TurnEvent::LlmFailed { generation, error } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_llm_failed(error).await;
            }
            TurnEvent::TtsChunk { generation, audio } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_tts_chunk(audio).await;
            }
            TurnEvent::TtsFinished { generation } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_tts_finished().await;
            }
            TurnEvent::TtsFailed { generation, error } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_tts_failed(error).await;
            }
            TurnEvent::PlaybackWatchdog { generation } => {
                if !self.is_current(generation) {
                    return;
                }
                self.on_playback_watchdog().await;
            }
        }
    }

    async fn on_llm_sentence(&mut self, text: String) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.first_sentence_at.is_none() {
            turn.first_sentence_at = Some(Instant::now());
        }
        turn.tokens_completion += estimate_tokens(&text);
        if !turn.agent_text.is_empty() {
            turn.agent_text.push(' ');
        }
        turn.agent_text.push_str(&text);

        match self.machine.current() {
            TurnState::Speculative => {
                turn.hold.push(text);
            }
            TurnState::Committed | TurnState::Speaking => {
                if let Some(queue) = &turn.tts_queue {
                    let _ = queue.send(text);
                }
            }
            state => {
                tracing::debug!(%state, "sentence arrived in unexpected state");
            }
        }
    }

    async fn on_llm_complete(&mut self, sentences: usize) {
        let tts_failed = {
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            turn.llm_done = true;
            // Close the sentence queue so the TTS worker can finish.
            turn.tts_queue = None;
            turn.tts_failed
        };

        if sentences == 0 {
            let error = Error::LlmEmptyResponse;
            tracing::error!("LLM produced no sentences");
            self.send_error(&error).await;
            self.timer.cancel();
            self.transition(TurnState::Idle).await;
            self.close_turn(TurnOutcome::LlmFailed, false).await;
            return;
        }
        if tts_failed {
            self.finish_with_text_fallback().await;
        }
    }

    async fn on_llm_failed(&mut self, error: Error) {
        tracing::error!(error = %error, "LLM stream failed");
        self.send_error(&error).await;
        if let Some(turn) = &self.turn {
            turn.llm_cancel.set();
            turn.tts_cancel.set();
        }
        self.timer.cancel();
        self.transition(TurnState::Idle).await;
        self.close_turn(TurnOutcome::LlmFailed, false).await;
    }

    async fn on_tts_chunk(&mut self, audio: Bytes) {
        let (index, first) = {
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            if turn.tts_cancel.is_set() {
                return;
            }
            let first = !turn.audio_started;
            if first {
                turn.audio_started = true;
                turn.first_audio_at = Some(Instant::now());
                if let Some(final_at) = turn.final_at {
                    let latency = final_at.elapsed().as_millis() as u64;
                    self.telemetry.record_latency(latency);
                    tracing::info!(latency_ms = latency, "first audio chunk");
                }
            }
            let index = turn.chunk_index;
            turn.chunk_index += 1;
            (index, first)
        };

        self.send(ServerEvent::AgentAudioChunk {
            audio,
            chunk_index: index,
            is_final: false,
        })
        .await;

        if first {
            self.transition(TurnState::Speaking).await;
            let generation = self.turn.as_ref().map(|t| t.generation).unwrap_or(0);
            self.spawn_playback_watchdog(generation);
        }
    }

    async fn on_tts_finished(&mut self) {
        let (audio_started, final_index) = {
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            let index = turn.chunk_index;
            turn.chunk_index += 1;
            (turn.audio_started, index)
        };

        if audio_started {
            // Trailing marker chunk: the final chunk of a turn always carries
            // is_final = true.
            self.send(ServerEvent::AgentAudioChunk {
                audio: Bytes::new(),
                chunk_index: final_index,
                is_final: true,
            })
            .await;
            self.emit_turn_complete().await;
            if let Some(turn) = self.turn.as_mut() {
                turn.waiting_for_playback = true;
            }
        } else {
            // Synthesis yielded nothing audible; close out immediately.
            self.emit_turn_complete().await;
            self.transition(TurnState::Idle).await;
            self.close_turn(TurnOutcome::Completed, false).await;
        }
    }

    async fn on_tts_failed(&mut self, error: Error) {
        tracing::error!(error = %error, "TTS failed for the turn");
        self.send_error(&error).await;
        let llm_done = {
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            turn.tts_failed = true;
            turn.tts_cancel.set();
            turn.tts_queue = None;
            turn.llm_done
        };
        if llm_done {
            self.finish_with_text_fallback().await;
        }
        // Otherwise the LLM is still streaming; the fallback fires on
        // LlmComplete with the full text.
    }

    /// Degraded path: deliver the response as text and close the turn.
    async fn finish_with_text_fallback(&mut self) {
        let text = self
            .turn
            .as_ref()
            .map(|t| t.agent_text.clone())
            .unwrap_or_default();
        self.send(ServerEvent::AgentTextFallback {
            text,
            reason: "tts_failed".to_string(),
        })
        .await;
        self.emit_turn_complete().await;
        self.transition(TurnState::Idle).await;
        self.close_turn(TurnOutcome::TtsFailed, false).await;
    }

    fn spawn_playback_watchdog(&self, generation: u64) {
        let timeout = self.settings.turn.playback_watchdog();
        let turn_tx = self.turn_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = turn_tx.send(TurnEvent::PlaybackWatchdog { generation }).await;
        });
    }

    async fn on_playback_watchdog(&mut self) {
        if self.machine.current() != TurnState::Speaking {
            return;
        }
        tracing::warn!("playback watchdog elapsed without playback_complete");
        if !self.turn.as_ref().map(|t| t.turn_complete_sent).unwrap_or(true) {
            self.emit_turn_complete().await;
        }
        self.transition(TurnState::Idle).await;
        self.close_turn(TurnOutcome::Completed, false).await;
    }

    // ------------------------------------------------------------------
    // Cancellation paths
    // ------------------------------------------------------------------

    /// Silent cancel: discard held output, close the turn without surfacing
    /// anything, and return to LISTENING. The transcript buffer keeps its
    /// finals, since the user is still mid-utterance.
    async fn cancel_speculation(&mut self, reason: &str) {
        tracing::info!(reason, "cancelling speculation");
        self.timer.cancel();
        if let Some(turn) = self.turn.as_mut() {
            turn.llm_cancel.set();
            turn.tts_cancel.set();
            turn.hold.clear();
            let wasted = turn.tokens_completion;
            self.telemetry.add_wasted_tokens(wasted);
        }
        self.transition(TurnState::Listening).await;
        self.close_turn_silent(TurnOutcome::SpeculativelyCanceled).await;
    }

    /// Barge-in from COMMITTED or SPEAKING: cancel everything, force the STT
    /// utterance closed, and start listening fresh.
    async fn barge_in(&mut self, reason: &str) {
        tracing::info!(reason, "barge-in");
        self.timer.cancel();
        if let Some(turn) = self.turn.as_mut() {
            turn.was_interrupted = true;
            turn.llm_cancel.set();
            turn.tts_cancel.set();
            turn.tts_queue = None;
            turn.hold.clear();
        }
        self.stt_tx.finalize().await;
        self.transition(TurnState::Listening).await;
        self.buffer.reset();
        self.ring.clear();
        self.close_turn(TurnOutcome::Interrupted, true).await;
    }

    // ------------------------------------------------------------------
    // Turn closure
    // ------------------------------------------------------------------

    async fn emit_turn_complete(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.turn_complete_sent {
            return;
        }
        turn.turn_complete_sent = true;
        let event = ServerEvent::TurnComplete {
            turn_id: turn.id.clone(),
            user_text: self.buffer.complete_text(),
            agent_text: turn.agent_text.clone(),
            duration_ms: turn.started_at.elapsed().as_millis() as u64,
            was_interrupted: turn.was_interrupted,
        };
        self.send(event).await;
    }

    /// Close the turn silently: no wire messages, buffer left intact.
    async fn close_turn_silent(&mut self, outcome: TurnOutcome) {
        self.finalize_turn(outcome, false, false).await;
    }

    async fn close_turn(&mut self, outcome: TurnOutcome, notify: bool) {
        self.finalize_turn(outcome, notify, true).await;
    }

    async fn finalize_turn(&mut self, outcome: TurnOutcome, notify: bool, reset_buffer: bool) {
        if notify {
            self.emit_turn_complete().await;
        }

        let Some(turn) = self.turn.take() else {
            return;
        };
        // Whatever closed the turn, nothing may keep streaming for it.
        turn.llm_cancel.set();
        turn.tts_cancel.set();

        let user_text = self.buffer.complete_text();
        let agent_text = match outcome {
            // Held sentences of a silent cancel never surface anywhere,
            // including the record.
            TurnOutcome::SpeculativelyCanceled => String::new(),
            _ => turn.agent_text.clone(),
        };
        let tokens_wasted = match outcome {
            TurnOutcome::SpeculativelyCanceled => turn.tokens_completion,
            _ => 0,
        };

        match outcome {
            TurnOutcome::Completed | TurnOutcome::TtsFailed => self.telemetry.turn_completed(),
            TurnOutcome::SpeculativelyCanceled => self.telemetry.turn_canceled(),
            TurnOutcome::Interrupted => self.telemetry.turn_interrupted(),
            TurnOutcome::LlmFailed => self.telemetry.turn_failed(),
        }

        // Adaptive debounce runs after every turn closure.
        self.debounce.observe(outcome);
        if self.session.adaptive_debounce_enabled {
            let next = self.debounce.adjust(
                self.session.debounce_ms,
                self.session.cancellation_threshold,
                self.session.min_debounce_ms,
                self.session.max_debounce_ms,
            );
            self.session.debounce_ms = self.session.clamp_debounce(next);
        }

        if outcome != TurnOutcome::SpeculativelyCanceled
            && (!user_text.is_empty() || !agent_text.is_empty())
        {
            self.history.add_turn(&user_text, &agent_text);
        }

        let latency = TurnLatencies {
            commit_to_first_sentence_ms: match (turn.commit_at, turn.first_sentence_at) {
                (Some(commit), Some(first)) if first >= commit => {
                    Some((first - commit).as_millis() as u64)
                }
                _ => None,
            },
            first_sentence_to_first_audio_ms: match (turn.first_sentence_at, turn.first_audio_at) {
                (Some(sentence), Some(audio)) => Some((audio - sentence).as_millis() as u64),
                _ => None,
            },
            final_to_first_audio_ms: match (turn.final_at, turn.first_audio_at) {
                (Some(fin), Some(audio)) => Some((audio - fin).as_millis() as u64),
                _ => None,
            },
        };

        let record = TurnRecord {
            turn_id: turn.id,
            session_id: self.session_id.clone(),
            started_at_ms: turn.started_at_ms,
            finished_at_ms: chrono::Utc::now().timestamp_millis(),
            user_text,
            agent_text,
            outcome,
            state_transitions: self.machine.take_log(),
            was_interrupted: turn.was_interrupted,
            tokens_prompt: turn.tokens_prompt,
            tokens_completion: turn.tokens_completion,
            tokens_wasted,
            latency,
        };
        self.writer.enqueue(record);

        if reset_buffer {
            self.buffer.reset();
        } else {
            self.buffer.unlock();
        }

        // Periodic telemetry after completed turns.
        if matches!(outcome, TurnOutcome::Completed | TurnOutcome::TtsFailed) {
            let every = self.settings.turn.telemetry_every_turns;
            if every > 0 && self.telemetry.completed_turns() % every == 0 {
                let snapshot = self.telemetry.snapshot(self.session.debounce_ms);
                self.send(ServerEvent::Telemetry(snapshot)).await;
            }
        }
    }
}
