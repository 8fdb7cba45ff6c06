use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Conversation log ─────────────────────────────────────────────────────────

/// One interview instance, opened against an existing report.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub report_id: String,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(report_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            role,
            content,
            created_at: Utc::now(),
        }
    }
}

// ── Turn phase ───────────────────────────────────────────────────────────────

/// Behavioral mode of the orchestrator, derived purely from the 1-indexed
/// turn number (count of user messages). Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Greeting,
    Interview,
    Farewell,
    Closed,
}

impl TurnPhase {
    /// Maps a turn number onto its phase for a given turn limit.
    /// Monotonic in `turn`; no phase can be skipped or revisited.
    pub fn from_turn(turn: u32, limit: u32) -> Self {
        if turn <= 1 {
            TurnPhase::Greeting
        } else if turn < limit {
            TurnPhase::Interview
        } else if turn == limit {
            TurnPhase::Farewell
        } else {
            TurnPhase::Closed
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnPhase::Greeting => "greeting",
            TurnPhase::Interview => "interview",
            TurnPhase::Farewell => "farewell",
            TurnPhase::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ── Risk model ───────────────────────────────────────────────────────────────

/// Risk tier of one assessment modality, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Good,
    Caution,
    Danger,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Good => "good",
            RiskTier::Caution => "caution",
            RiskTier::Danger => "danger",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RiskTier {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "good" => Ok(RiskTier::Good),
            "caution" => Ok(RiskTier::Caution),
            "danger" => Ok(RiskTier::Danger),
            other => Err(format!("Unknown risk tier: {other}")),
        }
    }
}

/// One independent assessment channel feeding the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Questionnaire,
    Drawing,
    Conversation,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Questionnaire => "questionnaire",
            Modality::Drawing => "drawing",
            Modality::Conversation => "conversation",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Modality {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "questionnaire" => Ok(Modality::Questionnaire),
            "drawing" => Ok(Modality::Drawing),
            "conversation" => Ok(Modality::Conversation),
            other => Err(format!("Unknown modality: {other}")),
        }
    }
}

/// Verdict recorded for one modality: the tier plus the scorer's finding text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityVerdict {
    pub tier: RiskTier,
    pub finding: String,
}

/// Aggregated screening report. Modality slots fill independently; the
/// final verdict exists only after explicit finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub questionnaire: Option<ModalityVerdict>,
    pub drawing: Option<ModalityVerdict>,
    pub conversation: Option<ModalityVerdict>,
    pub final_tier: Option<RiskTier>,
    pub narrative: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            questionnaire: None,
            drawing: None,
            conversation: None,
            final_tier: None,
            narrative: None,
            created_at: Utc::now(),
        }
    }

    pub fn verdict(&self, modality: Modality) -> Option<&ModalityVerdict> {
        match modality {
            Modality::Questionnaire => self.questionnaire.as_ref(),
            Modality::Drawing => self.drawing.as_ref(),
            Modality::Conversation => self.conversation.as_ref(),
        }
    }

    pub fn set_verdict(&mut self, modality: Modality, verdict: ModalityVerdict) {
        match modality {
            Modality::Questionnaire => self.questionnaire = Some(verdict),
            Modality::Drawing => self.drawing = Some(verdict),
            Modality::Conversation => self.conversation = Some(verdict),
        }
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

// ── Voice pipeline ───────────────────────────────────────────────────────────

/// Current stage of a voice-chat pipeline task. `Succeeded` and `Failed`
/// are terminal; a task in a terminal state is never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Transcribing,
    Conversing,
    Synthesizing,
    Succeeded,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Succeeded | PipelineStage::Failed)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineStage::Transcribing => "transcribing",
            PipelineStage::Conversing => "conversing",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Succeeded => "succeeded",
            PipelineStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which stage failed and why. Recorded once, then immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub message: String,
}

/// One voice-chat execution: transcribe → converse → synthesize.
/// Stage results are written only by the stage that owns them.
#[derive(Debug, Clone)]
pub struct PipelineTask {
    pub id: String,
    pub session_id: String,
    pub stage: PipelineStage,
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub audio: Option<Vec<u8>>,
    pub failure: Option<StageFailure>,
    pub created_at: DateTime<Utc>,
}

impl PipelineTask {
    pub fn new(session_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            stage: PipelineStage::Transcribing,
            transcript: None,
            reply: None,
            audio: None,
            failure: None,
            created_at: Utc::now(),
        }
    }
}

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub message: String,
}

/// Outcome of one non-streaming conversational turn.
#[derive(Debug, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub reply: String,
    pub turn: u32,
    pub phase: TurnPhase,
    /// True when the user's utterance asked to end the conversation early.
    pub wants_end: bool,
}
