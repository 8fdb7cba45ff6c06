//! Storage seams. The orchestrator and report service depend on these
//! traits, not on Postgres; the in-memory implementations back the unit
//! tests with the same atomicity contracts.

pub mod conversation_store;
pub mod report_store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{ChatSession, Message, Modality, ModalityVerdict, Report, RiskTier};

/// Outcome of a limit-checked user append.
#[derive(Debug)]
pub enum TurnAppend {
    /// The utterance was logged as turn `turn`.
    Appended { message: Message, turn: u32 },
    /// The session had already spent all its turns; nothing was written.
    Closed { turns: u32 },
}

/// Durable, append-only conversation log. The log is the single source of
/// truth for the turn number: turn = count of user messages.
#[async_trait]
pub trait ConversationLogStore: Send + Sync {
    async fn create_session(&self, session: &ChatSession) -> Result<(), AppError>;

    async fn find_session(&self, id: &str) -> Result<Option<ChatSession>, AppError>;

    /// Appends one message (assistant replies, canned texts).
    async fn append(&self, message: &Message) -> Result<(), AppError>;

    /// Appends a user utterance unless the session has already used up
    /// `limit` turns. Check and append are one atomic operation: with N
    /// concurrent calls for the same session, exactly `limit` of them (at
    /// most) get `Appended`, each with a distinct 1-indexed turn number.
    async fn append_user_within_limit(
        &self,
        session_id: &str,
        text: &str,
        limit: u32,
    ) -> Result<TurnAppend, AppError>;

    async fn count_user_messages(&self, session_id: &str) -> Result<u32, AppError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError>;
}

/// Screening reports: per-modality verdicts plus the finalized result.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create(&self) -> Result<Report, AppError>;

    async fn find(&self, id: &str) -> Result<Option<Report>, AppError>;

    async fn set_modality_risk(
        &self,
        report_id: &str,
        modality: Modality,
        verdict: ModalityVerdict,
    ) -> Result<(), AppError>;

    async fn finalize(
        &self,
        report_id: &str,
        tier: RiskTier,
        narrative: &str,
    ) -> Result<(), AppError>;
}
