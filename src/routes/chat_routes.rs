use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{Message, TurnPhase, TurnReply, TurnRequest};
use crate::routes::AppState;
use crate::service::turn_service::{PreparedTurn, TurnService, END_MARKER};

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub report_id: String,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// POST `/api/chat/sessions` — opens an interview session for a report.
pub async fn create_session_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let session = state.turns.create_session(&req.report_id).await?;
    Ok(Json(CreateSessionResponse { session_id: session.id }))
}

/// POST `/api/chat` — one non-streaming conversational turn.
pub async fn turn_handler(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnReply>, AppError> {
    let reply = state.turns.take_turn(&req.session_id, &req.message).await?;
    Ok(Json(reply))
}

/// GET `/api/chat/{session_id}/messages` — ordered conversation log.
pub async fn list_messages_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Message>>, AppError> {
    Ok(Json(state.turns.get_messages(&session_id).await?))
}

/// POST `/api/chat/stream` — one turn delivered as an SSE stream.
///
/// Events:
/// - `chunk`: partial reply text (repeated)
/// - `done`:  JSON `{message_id, turn, phase}` once the turn completed
/// - `error`: failure detail; the partial reply is discarded, not logged
///
/// Responds 409 if a stream is already active for the session. The stream
/// permit is released on every exit path, including client disconnect.
pub async fn stream_turn_handler(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let permit = state
        .stream_guard
        .try_acquire(&req.session_id)
        .ok_or_else(|| AppError::StreamAlreadyActive { session_id: req.session_id.clone() })?;

    // Validation, phase resolution, and the user-message append happen
    // while the permit is held; an error here drops the permit.
    let prepared = state
        .turns
        .prepare_stream_turn(&req.session_id, &req.message)
        .await?;

    let (tx, rx) = mpsc::channel::<Event>(64);
    let turns = state.turns.clone();
    let session_id = req.session_id.clone();

    tokio::spawn(async move {
        // Held for the whole stream; dropping it releases the guard.
        let _permit = permit;
        run_stream(turns, session_id, prepared, tx).await;
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|ev| (Ok::<_, Infallible>(ev), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn chunk_event(text: impl Into<String>) -> Event {
    Event::default().event("chunk").data(text.into())
}

fn done_event(message_id: Option<String>, turn: u32, phase: TurnPhase) -> Event {
    let payload = serde_json::json!({
        "message_id": message_id,
        "turn": turn,
        "phase": phase,
    });
    Event::default().event("done").data(payload.to_string())
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(message.to_string())
}

async fn run_stream(
    turns: TurnService,
    session_id: String,
    prepared: PreparedTurn,
    tx: mpsc::Sender<Event>,
) {
    match prepared {
        // Greeting and closed turns stream their fixed text as one chunk;
        // any log append already happened during preparation.
        PreparedTurn::Canned { text, turn, phase } => {
            let _ = tx.send(chunk_event(text)).await;
            let _ = tx.send(done_event(None, turn, phase)).await;
        }
        PreparedTurn::Generate { history, utterance, turn, phase } => {
            let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
            let generator = turns.generator();
            let generate = tokio::spawn(async move {
                generator
                    .generate_stream(&history, &utterance, turn, phase, chunk_tx)
                    .await
            });

            // Forward each chunk as it arrives while accumulating the
            // complete text for the final log append.
            let mut full_text = String::new();
            let mut client_gone = false;
            while let Some(chunk) = chunk_rx.recv().await {
                full_text.push_str(&chunk);
                if tx.send(chunk_event(chunk)).await.is_err() {
                    client_gone = true;
                    break;
                }
            }
            if client_gone {
                // Unblocks a generator still sending into a full channel.
                drop(chunk_rx);
            }

            match generate.await {
                Ok(Ok(())) if client_gone => {
                    // The reply is incomplete from the client's point of
                    // view; discard it rather than logging a truncated turn.
                    info!("Client disconnected mid-stream for session {session_id}; reply discarded");
                }
                Ok(Ok(())) => {
                    let final_text = turns.apply_end_marker(phase, &full_text);
                    if final_text != full_text {
                        let _ = tx.send(chunk_event(END_MARKER)).await;
                    }
                    match turns.record_assistant(&session_id, &final_text).await {
                        Ok(message) => {
                            let _ = tx.send(done_event(Some(message.id), turn, phase)).await;
                        }
                        Err(e) => {
                            // The durable append failed; never report success.
                            error!("Failed to record streamed reply for session {session_id}: {e}");
                            let _ = tx.send(error_event(&e.to_string())).await;
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!("Streaming generation failed for session {session_id}: {e}");
                    let _ = tx.send(error_event(&e.to_string())).await;
                }
                Err(e) => {
                    error!("Streaming task panicked for session {session_id}: {e}");
                    let _ = tx.send(error_event("internal error during streaming")).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::agent::TurnGenerator;
    use crate::db::memory::{MemoryConversationStore, MemoryReportStore};
    use crate::db::ConversationLogStore;
    use crate::models::MessageRole;
    use crate::service::turn_service::GREETING;

    /// Streams a fixed set of chunks, then either finishes or fails.
    struct ChunkedGenerator {
        chunks: Vec<&'static str>,
        fail_after: bool,
    }

    #[async_trait]
    impl TurnGenerator for ChunkedGenerator {
        async fn generate(
            &self,
            _history: &[crate::models::Message],
            _utterance: &str,
            _turn: u32,
            _phase: TurnPhase,
        ) -> Result<String, AppError> {
            Ok(self.chunks.concat())
        }

        async fn generate_stream(
            &self,
            _history: &[crate::models::Message],
            _utterance: &str,
            _turn: u32,
            _phase: TurnPhase,
            tx: mpsc::Sender<String>,
        ) -> Result<(), AppError> {
            for chunk in &self.chunks {
                if tx.send(chunk.to_string()).await.is_err() {
                    break;
                }
            }
            if self.fail_after {
                return Err(AppError::InferenceError { message: "model offline".into() });
            }
            Ok(())
        }
    }

    async fn service_with_session(
        chunks: Vec<&'static str>,
        fail_after: bool,
        limit: u32,
    ) -> (TurnService, Arc<MemoryConversationStore>) {
        let log = Arc::new(MemoryConversationStore::with_session("s1", "r1"));
        let svc = TurnService::new(
            log.clone(),
            Arc::new(MemoryReportStore::new()),
            Arc::new(ChunkedGenerator { chunks, fail_after }),
            limit,
        );
        (svc, log)
    }

    // Events carry their wire form in the buffer; render it to classify.
    fn kind(ev: &Event) -> &'static str {
        let wire = format!("{ev:?}");
        if wire.contains("event: done") {
            "done"
        } else if wire.contains("event: error") {
            "error"
        } else {
            "chunk"
        }
    }

    async fn collect(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    async fn prepared_generate(svc: &TurnService) -> PreparedTurn {
        // Turn 1 is the canned greeting; the next turn goes to the generator.
        svc.take_turn("s1", "hello").await.unwrap();
        let prepared = svc.prepare_stream_turn("s1", "tell me").await.unwrap();
        assert!(matches!(prepared, PreparedTurn::Generate { .. }));
        prepared
    }

    #[tokio::test]
    async fn successful_stream_logs_the_full_reply_exactly_once() {
        let (svc, log) = service_with_session(vec!["How ", "are ", "you?"], false, 7).await;
        let prepared = prepared_generate(&svc).await;

        let (tx, rx) = mpsc::channel(64);
        run_stream(svc, "s1".to_string(), prepared, tx).await;
        let events = collect(rx).await;

        assert_eq!(events.iter().filter(|e| kind(e) == "chunk").count(), 3);
        assert_eq!(events.iter().filter(|e| kind(e) == "done").count(), 1);
        assert_eq!(kind(events.last().unwrap()), "done");

        let messages = log.list_messages("s1").await.unwrap();
        let assistant: Vec<_> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect();
        // One greeting plus exactly one streamed reply, fully accumulated.
        assert_eq!(assistant.len(), 2);
        assert_eq!(assistant[0].content, GREETING);
        assert_eq!(assistant[1].content, "How are you?");
    }

    #[tokio::test]
    async fn farewell_stream_appends_the_end_marker() {
        // Limit 2 makes the generated turn the farewell.
        let (svc, log) = service_with_session(vec!["Thank ", "you."], false, 2).await;
        let prepared = prepared_generate(&svc).await;

        let (tx, rx) = mpsc::channel(64);
        run_stream(svc, "s1".to_string(), prepared, tx).await;
        let events = collect(rx).await;

        // The marker travels as its own extra chunk before `done`.
        assert_eq!(events.iter().filter(|e| kind(e) == "chunk").count(), 3);
        let logged = log.list_messages("s1").await.unwrap();
        assert!(logged.last().unwrap().content.ends_with(END_MARKER));
    }

    #[tokio::test]
    async fn failed_stream_discards_the_partial_reply() {
        let (svc, log) = service_with_session(vec!["par", "tial"], true, 7).await;
        let prepared = prepared_generate(&svc).await;
        let before = log.list_messages("s1").await.unwrap().len();

        let (tx, rx) = mpsc::channel(64);
        run_stream(svc, "s1".to_string(), prepared, tx).await;
        let events = collect(rx).await;

        // Chunks were forwarded, then the failure was reported.
        assert_eq!(kind(events.last().unwrap()), "error");
        assert_eq!(events.iter().filter(|e| kind(e) == "done").count(), 0);

        // The log is unchanged beyond the already-appended utterance: no
        // assistant message holds the partial text.
        let after = log.list_messages("s1").await.unwrap();
        assert_eq!(after.len(), before);
        assert_eq!(after.last().unwrap().role, MessageRole::User);
    }

    #[tokio::test]
    async fn client_disconnect_discards_the_reply() {
        let (svc, log) = service_with_session(vec!["lost ", "words"], false, 7).await;
        let prepared = prepared_generate(&svc).await;
        let before = log.list_messages("s1").await.unwrap().len();

        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        run_stream(svc, "s1".to_string(), prepared, tx).await;

        let after = log.list_messages("s1").await.unwrap();
        assert_eq!(after.len(), before);
        assert_eq!(after.last().unwrap().role, MessageRole::User);
    }
}
