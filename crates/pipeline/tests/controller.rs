//! End-to-end turn scenarios driven through the controller with scripted
//! adapters. Time is paused: timer fires and adapter delays run on the
//! virtual clock, so every scenario is deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use colloquy_config::{Settings, SettingsPatch};
use colloquy_core::{
    AudioChunk, AudioFormat, CancellationSignal, Error, GenerateRequest, LlmAdapter, Result,
    SttControl, SttEvent, SttStream, StreamChunk, TtsAdapter, TtsChunk, TtsRequest, TurnOutcome,
    TurnState,
};
use colloquy_persistence::{InMemoryTurnStore, RecordWriter};
use colloquy_pipeline::{ServerEvent, SessionEvent, TurnController};

type Script = Vec<(u64, &'static str)>;

struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
        })
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn stream_chunks(
        &self,
        _request: GenerateRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for (delay_ms, text) in script {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
                if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(StreamChunk::final_chunk())).await;
        });
        Ok(rx)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedTts {
    chunks_per_sentence: usize,
    chunk_delay_ms: u64,
    fail: AtomicBool,
}

impl ScriptedTts {
    fn new(chunks_per_sentence: usize, chunk_delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            chunks_per_sentence,
            chunk_delay_ms,
            fail: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            chunks_per_sentence: 0,
            chunk_delay_ms: 0,
            fail: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl TtsAdapter for ScriptedTts {
    async fn stream_audio(
        &self,
        _request: TtsRequest,
        cancel: CancellationSignal,
    ) -> Result<mpsc::Receiver<Result<TtsChunk>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::TtsUnavailable("synthesis backend down".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        let count = self.chunks_per_sentence;
        let delay = Duration::from_millis(self.chunk_delay_ms);
        tokio::spawn(async move {
            for i in 0..count {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let chunk = TtsChunk {
                    audio: Bytes::from(vec![i as u8; 160]),
                    is_final: false,
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(TtsChunk {
                    audio: Bytes::new(),
                    is_final: true,
                }))
                .await;
        });
        Ok(rx)
    }
}

struct Harness {
    events: mpsc::Sender<SessionEvent>,
    outbound: mpsc::Receiver<ServerEvent>,
    stt_events: mpsc::Sender<SttEvent>,
    stt_control: mpsc::Receiver<SttControl>,
    _stt_audio: mpsc::Receiver<Bytes>,
    store: Arc<InMemoryTurnStore>,
}

fn spawn_controller(llm: Arc<dyn LlmAdapter>, tts: Arc<dyn TtsAdapter>) -> Harness {
    let settings = Arc::new(Settings::default());
    let (audio_tx, audio_rx) = mpsc::channel(64);
    let (stt_event_tx, stt_event_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(8);
    let stt = SttStream {
        audio: audio_tx,
        events: stt_event_rx,
        control: control_tx,
    };

    let store = Arc::new(InMemoryTurnStore::new());
    let writer = RecordWriter::spawn(store.clone());
    let (outbound_tx, outbound_rx) = mpsc::channel(64);

    let (controller, handles) = TurnController::new(
        "session-1".to_string(),
        settings,
        stt,
        llm,
        tts,
        None,
        writer,
        outbound_tx,
    );
    tokio::spawn(controller.run());

    Harness {
        events: handles.events,
        outbound: outbound_rx,
        stt_events: stt_event_tx,
        stt_control: control_rx,
        _stt_audio: audio_rx,
        store,
    }
}

fn frame() -> AudioChunk {
    AudioChunk::new(Bytes::from(vec![0u8; 640]), AudioFormat::Pcm, 16_000).unwrap()
}

async fn next_event(harness: &mut Harness) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(120), harness.outbound.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("outbound channel closed")
}

async fn expect_state_change(harness: &mut Harness, from: TurnState, to: TurnState) {
    match next_event(harness).await {
        ServerEvent::StateChange { from: f, to: t } => {
            assert_eq!((f, t), (from, to), "unexpected state change");
        }
        other => panic!("expected state change {from}->{to}, got {other:?}"),
    }
}

/// Drive the session to SPECULATIVE with one final transcript.
async fn speak_final(harness: &mut Harness, text: &str) {
    harness
        .events
        .send(SessionEvent::AudioChunk(frame()))
        .await
        .unwrap();
    expect_state_change(harness, TurnState::Idle, TurnState::Listening).await;

    harness
        .stt_events
        .send(SttEvent::Final {
            text: text.to_string(),
            confidence: 0.97,
        })
        .await
        .unwrap();
    match next_event(harness).await {
        ServerEvent::TranscriptFinal { text: t, .. } => assert_eq!(t, text),
        other => panic!("expected transcript_final, got {other:?}"),
    }
    expect_state_change(harness, TurnState::Listening, TurnState::Speculative).await;
}

#[tokio::test(start_paused = true)]
async fn s1_happy_path_orders_messages_correctly() {
    let llm = ScriptedLlm::new(vec![vec![(50, "Hi there! ")]]);
    let tts = ScriptedTts::new(2, 30);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "Hello there.").await;

    // Silence timer fires at 400 ms; the held sentence flows to TTS.
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Committed).await;

    match next_event(&mut harness).await {
        ServerEvent::AgentAudioChunk {
            chunk_index,
            is_final,
            ..
        } => {
            assert_eq!(chunk_index, 0);
            assert!(!is_final);
        }
        other => panic!("expected first audio chunk, got {other:?}"),
    }
    expect_state_change(&mut harness, TurnState::Committed, TurnState::Speaking).await;

    match next_event(&mut harness).await {
        ServerEvent::AgentAudioChunk { chunk_index, .. } => assert_eq!(chunk_index, 1),
        other => panic!("expected second audio chunk, got {other:?}"),
    }
    match next_event(&mut harness).await {
        ServerEvent::AgentAudioChunk {
            chunk_index,
            is_final,
            audio,
        } => {
            assert_eq!(chunk_index, 2);
            assert!(is_final);
            assert!(audio.is_empty());
        }
        other => panic!("expected final audio marker, got {other:?}"),
    }
    match next_event(&mut harness).await {
        ServerEvent::TurnComplete {
            agent_text,
            was_interrupted,
            user_text,
            ..
        } => {
            assert!(agent_text.contains("Hi"));
            assert!(!was_interrupted);
            assert_eq!(user_text, "Hello there.");
        }
        other => panic!("expected turn_complete, got {other:?}"),
    }

    harness
        .events
        .send(SessionEvent::PlaybackComplete)
        .await
        .unwrap();
    expect_state_change(&mut harness, TurnState::Speaking, TurnState::Idle).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let records = harness.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::Completed);
    assert!(!records[0].was_interrupted);
    assert!(records[0].latency.final_to_first_audio_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn s2_speculative_cancel_is_silent() {
    let llm = ScriptedLlm::new(vec![
        vec![(100, "Sure thing. ")],
        // Second speculation after the cancel; keep it slow so the test can
        // finish before it matters.
        vec![(5_000, "ok. ")],
    ]);
    let tts = ScriptedTts::new(2, 30);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "I want to book").await;

    // Let the speculative LLM produce its held sentence.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // New speech before the timer fires cancels silently.
    harness
        .stt_events
        .send(SttEvent::Partial {
            text: "I want to book a flight".to_string(),
            confidence: 0.8,
        })
        .await
        .unwrap();

    match next_event(&mut harness).await {
        ServerEvent::TranscriptPartial { text, .. } => {
            assert_eq!(text, "I want to book a flight");
        }
        other => panic!("expected transcript_partial, got {other:?}"),
    }
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Listening).await;

    // Nothing else surfaces for the abandoned speculation.
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness
        .events
        .send(SessionEvent::TelemetryRequest)
        .await
        .unwrap();
    loop {
        match next_event(&mut harness).await {
            ServerEvent::AgentAudioChunk { .. } => panic!("audio from canceled speculation"),
            ServerEvent::TurnComplete { .. } => panic!("turn_complete from canceled speculation"),
            ServerEvent::Telemetry(snapshot) => {
                assert!(snapshot.tokens_wasted > 0, "wasted tokens not counted");
                break;
            }
            _ => {}
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let records = harness.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::SpeculativelyCanceled);
    assert!(records[0].agent_text.is_empty());
    assert!(records[0].tokens_wasted > 0);
}

#[tokio::test(start_paused = true)]
async fn s3_barge_in_during_speaking_stops_audio() {
    let llm = ScriptedLlm::new(vec![vec![(50, "Let me explain this at length. ")]]);
    // Plenty of chunks so the barge-in lands mid-stream.
    let tts = ScriptedTts::new(20, 50);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "Tell me everything.").await;
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Committed).await;

    // Wait for SPEAKING.
    loop {
        match next_event(&mut harness).await {
            ServerEvent::StateChange { from, to } => {
                assert_eq!((from, to), (TurnState::Committed, TurnState::Speaking));
                break;
            }
            ServerEvent::AgentAudioChunk { .. } => {}
            other => panic!("unexpected event before speaking: {other:?}"),
        }
    }

    // Barge in with a new audio frame.
    harness
        .events
        .send(SessionEvent::AudioChunk(frame()))
        .await
        .unwrap();

    let mut saw_listening = false;
    let mut saw_turn_complete = false;
    loop {
        match next_event(&mut harness).await {
            ServerEvent::StateChange { from, to } => {
                assert_eq!((from, to), (TurnState::Speaking, TurnState::Listening));
                saw_listening = true;
            }
            ServerEvent::TurnComplete {
                was_interrupted, ..
            } => {
                assert!(was_interrupted);
                saw_turn_complete = true;
            }
            // In-flight chunks emitted before the barge-in was processed are
            // allowed; none may follow turn_complete.
            ServerEvent::AgentAudioChunk { .. } => {
                assert!(!saw_turn_complete, "audio chunk after interrupted turn closed");
            }
            other => panic!("unexpected event during barge-in: {other:?}"),
        }
        if saw_listening && saw_turn_complete {
            break;
        }
    }

    // STT was told to finalize the utterance.
    let control = tokio::time::timeout(Duration::from_secs(5), harness.stt_control.recv())
        .await
        .expect("no stt control frame")
        .unwrap();
    assert_eq!(control, SttControl::Finalize);

    // No further audio chunks arrive once the turn is closed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = harness.outbound.try_recv() {
        assert!(
            !matches!(event, ServerEvent::AgentAudioChunk { .. }),
            "audio leaked after barge-in"
        );
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let records = harness.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::Interrupted);
    assert!(records[0].was_interrupted);
}

#[tokio::test(start_paused = true)]
async fn s4_correction_marker_cancels_immediately() {
    let llm = ScriptedLlm::new(vec![
        vec![(100, "Booking it now. ")],
        vec![(5_000, "ok. ")],
    ]);
    let tts = ScriptedTts::new(2, 30);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "Book the flight").await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // A correction-marker final cancels the speculation at once and then
    // starts a fresh one with the fuller transcript.
    harness
        .stt_events
        .send(SttEvent::Final {
            text: "Actually, cancel that".to_string(),
            confidence: 0.95,
        })
        .await
        .unwrap();

    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Listening).await;
    match next_event(&mut harness).await {
        ServerEvent::TranscriptFinal { text, .. } => assert_eq!(text, "Actually, cancel that"),
        other => panic!("expected transcript_final, got {other:?}"),
    }
    expect_state_change(&mut harness, TurnState::Listening, TurnState::Speculative).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let records = harness.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::SpeculativelyCanceled);
}

#[tokio::test(start_paused = true)]
async fn s5_tts_failure_falls_back_to_text() {
    let llm = ScriptedLlm::new(vec![vec![(50, "Sure, booking now. ")]]);
    let tts = ScriptedTts::failing();
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "Book it.").await;
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Committed).await;

    let mut saw_fallback = false;
    let mut saw_turn_complete = false;
    let mut saw_idle = false;
    while !(saw_fallback && saw_turn_complete && saw_idle) {
        match next_event(&mut harness).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "TTS_UNAVAILABLE"),
            ServerEvent::AgentTextFallback { text, reason } => {
                assert_eq!(text, "Sure, booking now.");
                assert_eq!(reason, "tts_failed");
                saw_fallback = true;
            }
            ServerEvent::TurnComplete { agent_text, .. } => {
                assert_eq!(agent_text, "Sure, booking now.");
                saw_turn_complete = true;
            }
            ServerEvent::StateChange { to, .. } => {
                if to == TurnState::Idle {
                    saw_idle = true;
                }
            }
            ServerEvent::AgentAudioChunk { .. } => panic!("audio despite TTS failure"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let records = harness.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::TtsFailed);
    assert_eq!(records[0].agent_text, "Sure, booking now.");
}

#[tokio::test(start_paused = true)]
async fn s6_repeated_cancellations_grow_the_debounce() {
    let llm = ScriptedLlm::new(vec![
        vec![(5_000, "a. ")],
        vec![(5_000, "b. ")],
        vec![(5_000, "c. ")],
        vec![(5_000, "d. ")],
    ]);
    let tts = ScriptedTts::new(1, 10);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "first").await;

    // Three cancels: every closure adjusts the debounce upward by 50 ms
    // while the rolling cancellation rate stays above threshold.
    for i in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .stt_events
            .send(SttEvent::Final {
                text: format!("again {i}"),
                confidence: 0.9,
            })
            .await
            .unwrap();
        expect_state_change(&mut harness, TurnState::Speculative, TurnState::Listening).await;
        match next_event(&mut harness).await {
            ServerEvent::TranscriptFinal { .. } => {}
            other => panic!("expected transcript_final, got {other:?}"),
        }
        expect_state_change(&mut harness, TurnState::Listening, TurnState::Speculative).await;
    }

    harness
        .events
        .send(SessionEvent::TelemetryRequest)
        .await
        .unwrap();
    loop {
        if let ServerEvent::Telemetry(snapshot) = next_event(&mut harness).await {
            assert_eq!(snapshot.avg_debounce_ms, 550, "400 + 3 x 50");
            assert!(snapshot.cancellation_rate > 0.9);
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn endpoint_hint_shortens_the_debounce() {
    let llm = ScriptedLlm::new(vec![vec![(10, "Done. ")]]);
    let tts = ScriptedTts::new(1, 10);
    let mut harness = spawn_controller(llm, tts);

    speak_final(&mut harness, "That's all.").await;

    harness.stt_events.send(SttEvent::Endpoint).await.unwrap();

    // Commit arrives well before the 400 ms adaptive debounce would fire.
    tokio::time::sleep(Duration::from_millis(150)).await;
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Committed).await;
}

#[tokio::test(start_paused = true)]
async fn settings_update_applies_immediately() {
    let llm = ScriptedLlm::new(vec![vec![(10, "Ok. ")]]);
    let tts = ScriptedTts::new(1, 10);
    let mut harness = spawn_controller(llm, tts);

    harness
        .events
        .send(SessionEvent::SettingsUpdate(SettingsPatch {
            silence_debounce_ms: Some(1200),
            adaptive_debounce_enabled: Some(false),
            ..Default::default()
        }))
        .await
        .unwrap();

    speak_final(&mut harness, "Slow down.").await;

    // At the old 400 ms default nothing fires.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(harness.outbound.try_recv().is_err());

    // The configured 1200 ms window commits.
    tokio::time::sleep(Duration::from_millis(450)).await;
    expect_state_change(&mut harness, TurnState::Speculative, TurnState::Committed).await;
}

#[tokio::test(start_paused = true)]
async fn text_input_short_circuits_stt() {
    let llm = ScriptedLlm::new(vec![vec![(10, "Hello back. ")]]);
    let tts = ScriptedTts::new(1, 10);
    let mut harness = spawn_controller(llm, tts);

    harness
        .events
        .send(SessionEvent::TextInput {
            text: "Hello there.".to_string(),
        })
        .await
        .unwrap();

    expect_state_change(&mut harness, TurnState::Idle, TurnState::Listening).await;
    match next_event(&mut harness).await {
        ServerEvent::TranscriptFinal { text, confidence, .. } => {
            assert_eq!(text, "Hello there.");
            assert!((confidence - 1.0).abs() < f32::EPSILON);
        }
        other => panic!("expected transcript_final, got {other:?}"),
    }
    expect_state_change(&mut harness, TurnState::Listening, TurnState::Speculative).await;
}
