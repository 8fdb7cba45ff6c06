use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{PipelineStage, StageFailure};
use crate::routes::AppState;

#[derive(Deserialize)]
pub struct SubmitVoiceRequest {
    pub session_id: String,
    /// Base64-encoded audio bytes, as captured by the client recorder.
    pub audio: String,
}

#[derive(Serialize)]
pub struct SubmitVoiceResponse {
    pub task_id: String,
}

/// View of a pipeline task. Mid-flight tasks expose only their stage;
/// terminal tasks carry either the full result triple or the failure.
#[derive(Serialize)]
pub struct PipelineTaskView {
    pub task_id: String,
    pub session_id: String,
    pub stage: PipelineStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Base64-encoded synthesized audio, present once succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

/// POST `/api/voice` — accepts one voice submission and enqueues the
/// transcribe → converse → synthesize chain. Returns the task handle
/// immediately; progress is observed via polling.
pub async fn submit_voice_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitVoiceRequest>,
) -> Result<Json<SubmitVoiceResponse>, AppError> {
    if req.audio.is_empty() {
        return Err(AppError::EmptyField { field_name: "audio".to_string() });
    }
    let audio = base64::engine::general_purpose::STANDARD
        .decode(&req.audio)
        .map_err(|e| AppError::InvalidField {
            field_name: "audio".to_string(),
            message: format!("not valid base64: {e}"),
        })?;

    // Reject unknown sessions up front rather than letting the job fail
    // later at the conversing stage.
    state.turns.get_messages(&req.session_id).await?;

    let task_id = state.pipeline.submit(&req.session_id, audio);
    Ok(Json(SubmitVoiceResponse { task_id }))
}

/// GET `/api/voice/{task_id}` — non-blocking task snapshot.
pub async fn poll_voice_handler(
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PipelineTaskView>, AppError> {
    let task = state.pipeline.poll(&task_id)?;
    let audio = task
        .audio
        .as_ref()
        .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));
    Ok(Json(PipelineTaskView {
        task_id: task.id,
        session_id: task.session_id,
        stage: task.stage,
        transcript: task.transcript,
        reply: task.reply,
        audio,
        failure: task.failure,
    }))
}
