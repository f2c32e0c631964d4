//! Server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use colloquy_config::Settings;
use colloquy_core::{LlmAdapter, Retriever, SttAdapter, TtsAdapter};
use colloquy_llm::OpenAiCompatLlm;
use colloquy_persistence::{InMemoryTurnStore, RecordWriter};
use colloquy_rag::{LexicalRetriever, RetrieverConfig};
use colloquy_server::{create_router, AppState, SessionManager};
use colloquy_stt::StreamingStt;
use colloquy_tts::StreamingTts;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let settings = Arc::new(Settings::from_env());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting colloquy server");

    let stt: Arc<dyn SttAdapter> = Arc::new(StreamingStt::new(settings.stt.clone()));
    let llm: Arc<dyn LlmAdapter> = Arc::new(OpenAiCompatLlm::new(settings.llm.clone())?);
    let tts: Arc<dyn TtsAdapter> = Arc::new(StreamingTts::new(settings.tts.clone())?);

    let retriever: Option<Arc<dyn Retriever>> = if settings.rag.enabled {
        let retriever = LexicalRetriever::new(RetrieverConfig {
            min_score: settings.rag.min_score,
            ..RetrieverConfig::default()
        });
        Some(Arc::new(retriever))
    } else {
        None
    };

    let store = Arc::new(InMemoryTurnStore::new());
    let writer = RecordWriter::spawn(store);

    let sessions = Arc::new(SessionManager::new(
        settings.server.max_sessions,
        Duration::from_secs(settings.server.inactivity_timeout_secs),
    ));
    let _sweep = sessions.start_sweep_task();

    let state = AppState {
        settings: settings.clone(),
        sessions,
        stt,
        llm,
        tts,
        retriever,
        writer,
    };

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
