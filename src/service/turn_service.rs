use std::sync::Arc;

use tracing::info;

use crate::agent::TurnGenerator;
use crate::db::{ConversationLogStore, ReportStore, TurnAppend};
use crate::errors::AppError;
use crate::models::{
    ChatSession, Message, MessageRole, TurnPhase, TurnReply,
};

const MAX_MESSAGE_LENGTH: usize = 8000;

/// Fixed opening line for turn 1. No model call is made for the greeting.
pub const GREETING: &str =
    "Hello, let's begin our conversation. To help me understand you well, \
     please answer in full sentences rather than single words.\n\n\
     First, could you tell me what day of the week it is today?";

/// Appended to the farewell reply so the client knows the interview is over.
pub const END_MARKER: &str = " Please press the finish button below.";

/// Returned on every turn past the limit, without touching the log.
pub const CLOSED_MESSAGE: &str =
    "The conversation has already ended. Please press the finish button \
     below to complete your assessment.";

const END_KEYWORDS: &[&str] = &["stop", "quit", "goodbye", "end the conversation", "i'm done"];

fn wants_end(text: &str) -> bool {
    let lowered = text.to_lowercase();
    END_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// What the streaming endpoint should do for a prepared turn: either emit a
/// fixed text as a single chunk, or forward generator output chunk by chunk.
pub enum PreparedTurn {
    Canned {
        text: String,
        turn: u32,
        phase: TurnPhase,
    },
    Generate {
        history: Vec<Message>,
        utterance: String,
        turn: u32,
        phase: TurnPhase,
    },
}

/// Drives one conversational turn: appends the utterance, derives the turn
/// number and phase from the log, and dispatches on the phase. The log is
/// the only state; phase is recomputed identically on every call.
#[derive(Clone)]
pub struct TurnService {
    log: Arc<dyn ConversationLogStore>,
    reports: Arc<dyn ReportStore>,
    generator: Arc<dyn TurnGenerator>,
    turn_limit: u32,
}

impl TurnService {
    pub fn new(
        log: Arc<dyn ConversationLogStore>,
        reports: Arc<dyn ReportStore>,
        generator: Arc<dyn TurnGenerator>,
        turn_limit: u32,
    ) -> Self {
        Self { log, reports, generator, turn_limit }
    }

    /// Opens a new interview session against an existing report.
    pub async fn create_session(&self, report_id: &str) -> Result<ChatSession, AppError> {
        self.reports
            .find(report_id)
            .await?
            .ok_or_else(|| AppError::ReportNotFound { id: report_id.to_string() })?;

        let session = ChatSession::new(report_id.to_string());
        self.log.create_session(&session).await?;
        info!("Opened session {} for report {report_id}", session.id);
        Ok(session)
    }

    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        self.require_session(session_id).await?;
        self.log.list_messages(session_id).await
    }

    async fn require_session(&self, session_id: &str) -> Result<ChatSession, AppError> {
        self.log
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound { id: session_id.to_string() })
    }

    fn validate(text: &str) -> Result<(), AppError> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        if text.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: text.len(),
            });
        }
        Ok(())
    }

    /// Adds the termination marker on farewell turns when the generator
    /// did not produce it itself.
    pub fn apply_end_marker(&self, phase: TurnPhase, text: &str) -> String {
        if phase == TurnPhase::Farewell && !text.ends_with(END_MARKER) {
            format!("{text}{END_MARKER}")
        } else {
            text.to_string()
        }
    }

    /// One complete non-streaming turn.
    pub async fn take_turn(&self, session_id: &str, text: &str) -> Result<TurnReply, AppError> {
        Self::validate(text)?;
        self.require_session(session_id).await?;

        // The limit check and the append are one store operation, so a
        // closed session is answered without any log mutation even under
        // concurrent submissions, and repeated calls stay idempotent.
        let (user_message, turn) = match self
            .log
            .append_user_within_limit(session_id, text, self.turn_limit)
            .await?
        {
            TurnAppend::Closed { turns } => {
                return Ok(TurnReply {
                    session_id: session_id.to_string(),
                    reply: CLOSED_MESSAGE.to_string(),
                    turn: turns + 1,
                    phase: TurnPhase::Closed,
                    wants_end: false,
                });
            }
            TurnAppend::Appended { message, turn } => (message, turn),
        };
        let phase = TurnPhase::from_turn(turn, self.turn_limit);

        let reply = match phase {
            TurnPhase::Greeting => {
                let reply = GREETING.to_string();
                self.record_assistant(session_id, &reply).await?;
                reply
            }
            TurnPhase::Interview | TurnPhase::Farewell => {
                let history = self.history_before(session_id, &user_message.id).await?;
                let generated = self
                    .generator
                    .generate(&history, text, turn, phase)
                    .await?;
                let reply = self.apply_end_marker(phase, &generated);
                self.record_assistant(session_id, &reply).await?;
                reply
            }
            // An appended turn is always <= the limit, so the phase here
            // is never Closed; the arm only satisfies exhaustiveness.
            TurnPhase::Closed => CLOSED_MESSAGE.to_string(),
        };

        Ok(TurnReply {
            session_id: session_id.to_string(),
            reply,
            turn,
            phase,
            wants_end: wants_end(text),
        })
    }

    /// First half of a streaming turn: validate, resolve phase, append the
    /// utterance (unless the session is closed), and decide between a
    /// canned chunk and generator forwarding.
    pub async fn prepare_stream_turn(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<PreparedTurn, AppError> {
        Self::validate(text)?;
        self.require_session(session_id).await?;

        let (user_message, turn) = match self
            .log
            .append_user_within_limit(session_id, text, self.turn_limit)
            .await?
        {
            TurnAppend::Closed { turns } => {
                return Ok(PreparedTurn::Canned {
                    text: CLOSED_MESSAGE.to_string(),
                    turn: turns + 1,
                    phase: TurnPhase::Closed,
                });
            }
            TurnAppend::Appended { message, turn } => (message, turn),
        };
        let phase = TurnPhase::from_turn(turn, self.turn_limit);

        match phase {
            TurnPhase::Greeting => {
                self.record_assistant(session_id, GREETING).await?;
                Ok(PreparedTurn::Canned {
                    text: GREETING.to_string(),
                    turn,
                    phase,
                })
            }
            TurnPhase::Closed => Ok(PreparedTurn::Canned {
                text: CLOSED_MESSAGE.to_string(),
                turn,
                phase,
            }),
            TurnPhase::Interview | TurnPhase::Farewell => {
                let history = self.history_before(session_id, &user_message.id).await?;
                Ok(PreparedTurn::Generate {
                    history,
                    utterance: text.to_string(),
                    turn,
                    phase,
                })
            }
        }
    }

    pub fn generator(&self) -> Arc<dyn TurnGenerator> {
        self.generator.clone()
    }

    /// Appends the complete assistant reply once a stream has finished.
    /// Never called for a failed stream: partial text is discarded.
    pub async fn record_assistant(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<Message, AppError> {
        let message = Message::new(
            session_id.to_string(),
            MessageRole::Assistant,
            content.to_string(),
        );
        self.log.append(&message).await?;
        Ok(message)
    }

    /// Full prior history, excluding the utterance that started this turn;
    /// the utterance travels separately to the generator.
    async fn history_before(
        &self,
        session_id: &str,
        current_message_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let all = self.log.list_messages(session_id).await?;
        Ok(all
            .into_iter()
            .filter(|m| m.id != current_message_id)
            .collect())
    }
}
