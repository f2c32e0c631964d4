//! Provider wire messages and their mapping to `SttEvent`s.

use serde::Deserialize;

use colloquy_core::SttEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderMessage {
    Results {
        channel: ResultsChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd {},
    SpeechStarted {},
    Metadata {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ResultsChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Map one provider message to zero or more transcript events.
pub fn decode(text: &str) -> Vec<SttEvent> {
    let parsed: ProviderMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognized stt message, skipping");
            return Vec::new();
        }
    };

    match parsed {
        ProviderMessage::Results {
            channel,
            is_final,
            speech_final,
        } => {
            let Some(alt) = channel.alternatives.into_iter().next() else {
                return Vec::new();
            };
            let text = alt.transcript.trim().to_string();
            if text.is_empty() {
                return Vec::new();
            }
            let mut events = Vec::with_capacity(2);
            if is_final {
                events.push(SttEvent::Final {
                    text,
                    confidence: alt.confidence,
                });
                if speech_final {
                    events.push(SttEvent::Endpoint);
                }
            } else {
                events.push(SttEvent::Partial {
                    text,
                    confidence: alt.confidence,
                });
            }
            events
        }
        ProviderMessage::UtteranceEnd {} => vec![SttEvent::Endpoint],
        ProviderMessage::SpeechStarted {}
        | ProviderMessage::Metadata {}
        | ProviderMessage::Unknown => Vec::new(),
    }
}
