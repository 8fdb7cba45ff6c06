use async_trait::async_trait;
use futures_util::StreamExt;
use rig::agent::MultiTurnStreamItem;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use rig::streaming::{StreamedAssistantContent, StreamingChat};
use tokio::sync::mpsc;
use tracing::error;

use crate::errors::AppError;
use crate::models::{Message, MessageRole, TurnPhase};

const DEFAULT_MODEL: &str = "llama3.2";

const INTERVIEW_PREAMBLE: &str =
    "You are a friendly conversation partner for an older adult. \
     React briefly to what the user says and ask one gentle follow-up \
     question. Never talk about yourself, never repeat a question you \
     already asked, and never use clinical terms.";

const FAREWELL_PREAMBLE: &str =
    "You are wrapping up the conversation. Acknowledge the user's last \
     message warmly in one or two sentences. Do not ask any new questions.";

/// The AI-turn collaborator: given the prior history and the current
/// utterance, produce the assistant's next reply, whole or streamed.
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[Message],
        utterance: &str,
        turn: u32,
        phase: TurnPhase,
    ) -> Result<String, AppError>;

    /// Streams the reply token by token into `tx`. Chunks already sent are
    /// the caller's to accumulate; an error means the reply is incomplete
    /// and must not be logged.
    async fn generate_stream(
        &self,
        history: &[Message],
        utterance: &str,
        turn: u32,
        phase: TurnPhase,
        tx: mpsc::Sender<String>,
    ) -> Result<(), AppError>;
}

fn to_rig_history(messages: &[Message]) -> Vec<RigMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            MessageRole::User => RigMessage::user(&m.content),
            MessageRole::Assistant => RigMessage::assistant(&m.content),
        })
        .collect()
}

/// Runs each turn against a local Ollama model via rig. A fresh agent is
/// built per request so the history is replayed from the log each time.
#[derive(Clone)]
pub struct OllamaTurnService {
    client: ollama::Client,
    base_url: String,
    model: String,
}

impl OllamaTurnService {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Ollama client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    fn preamble(&self, phase: TurnPhase, turn: u32) -> String {
        match phase {
            TurnPhase::Farewell => FAREWELL_PREAMBLE.to_string(),
            _ => format!("{INTERVIEW_PREAMBLE} This is turn {turn} of the conversation."),
        }
    }

    fn map_error(&self, e: impl std::fmt::Display) -> AppError {
        let msg = e.to_string();
        if msg.contains("Connection refused") || msg.contains("connect") {
            AppError::AgentUnavailable { host: self.base_url.clone() }
        } else {
            AppError::InferenceError { message: msg }
        }
    }
}

#[async_trait]
impl TurnGenerator for OllamaTurnService {
    async fn generate(
        &self,
        history: &[Message],
        utterance: &str,
        turn: u32,
        phase: TurnPhase,
    ) -> Result<String, AppError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&self.preamble(phase, turn))
            .build();

        agent
            .chat(utterance, to_rig_history(history))
            .await
            .map_err(|e| {
                error!("Inference failed on turn {turn}: {e}");
                self.map_error(e)
            })
    }

    async fn generate_stream(
        &self,
        history: &[Message],
        utterance: &str,
        turn: u32,
        phase: TurnPhase,
        tx: mpsc::Sender<String>,
    ) -> Result<(), AppError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&self.preamble(phase, turn))
            .build();

        let mut stream = agent.stream_chat(utterance, to_rig_history(history)).await;

        while let Some(item) = stream.next().await {
            match item {
                Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(text))) => {
                    // Receiver gone means the client disconnected; stop quietly.
                    if tx.send(text.text).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Inference stream failed on turn {turn}: {e}");
                    return Err(self.map_error(e));
                }
            }
        }
        Ok(())
    }
}
