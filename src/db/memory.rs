//! In-memory store implementations used as test fixtures. They honor the
//! same atomicity contracts as the Postgres stores: the limit check and
//! the append are a single critical section.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::{ConversationLogStore, ReportStore, TurnAppend};
use crate::errors::AppError;
use crate::models::{ChatSession, Message, MessageRole, Modality, ModalityVerdict, Report, RiskTier};

#[derive(Default)]
struct LogState {
    sessions: HashMap<String, ChatSession>,
    messages: HashMap<String, Vec<Message>>,
}

#[derive(Default)]
pub struct MemoryConversationStore {
    state: Mutex<LogState>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session without touching the report store; tests that only
    /// exercise the orchestrator use this.
    pub fn with_session(session_id: &str, report_id: &str) -> Self {
        let store = Self::new();
        let mut state = store.state.lock().unwrap();
        state.sessions.insert(
            session_id.to_string(),
            ChatSession {
                id: session_id.to_string(),
                report_id: report_id.to_string(),
                created_at: chrono::Utc::now(),
            },
        );
        drop(state);
        store
    }
}

#[async_trait]
impl ConversationLogStore for MemoryConversationStore {
    async fn create_session(&self, session: &ChatSession) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<ChatSession>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.get(id).cloned())
    }

    async fn append(&self, message: &Message) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn append_user_within_limit(
        &self,
        session_id: &str,
        text: &str,
        limit: u32,
    ) -> Result<TurnAppend, AppError> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(session_id) {
            return Err(AppError::SessionNotFound { id: session_id.to_string() });
        }
        let log = state.messages.entry(session_id.to_string()).or_default();
        let count = log.iter().filter(|m| m.role == MessageRole::User).count() as u32;
        if count >= limit {
            return Ok(TurnAppend::Closed { turns: count });
        }
        let message = Message::new(session_id.to_string(), MessageRole::User, text.to_string());
        log.push(message.clone());
        Ok(TurnAppend::Appended { message, turn: count + 1 })
    }

    async fn count_user_messages(&self, session_id: &str) -> Result<u32, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .get(session_id)
            .map(|log| log.iter().filter(|m| m.role == MessageRole::User).count() as u32)
            .unwrap_or(0))
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.get(session_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryReportStore {
    reports: Mutex<HashMap<String, Report>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create(&self) -> Result<Report, AppError> {
        let report = Report::new();
        self.reports
            .lock()
            .unwrap()
            .insert(report.id.clone(), report.clone());
        Ok(report)
    }

    async fn find(&self, id: &str) -> Result<Option<Report>, AppError> {
        Ok(self.reports.lock().unwrap().get(id).cloned())
    }

    async fn set_modality_risk(
        &self,
        report_id: &str,
        modality: Modality,
        verdict: ModalityVerdict,
    ) -> Result<(), AppError> {
        let mut reports = self.reports.lock().unwrap();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| AppError::ReportNotFound { id: report_id.to_string() })?;
        report.set_verdict(modality, verdict);
        Ok(())
    }

    async fn finalize(
        &self,
        report_id: &str,
        tier: RiskTier,
        narrative: &str,
    ) -> Result<(), AppError> {
        let mut reports = self.reports.lock().unwrap();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| AppError::ReportNotFound { id: report_id.to_string() })?;
        report.final_tier = Some(tier);
        report.narrative = Some(narrative.to_string());
        Ok(())
    }
}
