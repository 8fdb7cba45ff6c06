mod agent;
mod config;
mod db;
mod errors;
mod models;
mod pipeline;
mod risk;
mod routes;
mod service;
mod speech;
mod stream_guard;

use std::sync::Arc;

use axum::{routing::get, routing::post, routing::put, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::OllamaTurnService;
use crate::config::Config;
use crate::db::conversation_store::PgConversationStore;
use crate::db::report_store::PgReportStore;
use crate::pipeline::PipelineExecutor;
use crate::routes::chat_routes::{
    create_session_handler, list_messages_handler, stream_turn_handler, turn_handler,
};
use crate::routes::report_routes::{
    create_report_handler, finalize_handler, get_report_handler, set_risk_handler,
};
use crate::routes::voice_routes::{poll_voice_handler, submit_voice_handler};
use crate::routes::AppState;
use crate::service::report_service::ReportService;
use crate::service::turn_service::TurnService;
use crate::speech::{ElevenLabsSynthesizer, WhisperTranscriber};
use crate::stream_guard::StreamGuard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cogscreen=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let log_store = Arc::new(PgConversationStore::new(pool.clone()));
    let report_store = Arc::new(PgReportStore::new(pool.clone()));
    let generator = Arc::new(OllamaTurnService::new(&config.ollama_base_url)?);
    let transcriber = Arc::new(WhisperTranscriber::new(
        &config.stt_base_url,
        &config.stt_api_key,
    ));
    let synthesizer = Arc::new(ElevenLabsSynthesizer::new(
        &config.tts_base_url,
        &config.tts_api_key,
        &config.tts_voice_id,
    ));

    let turns = TurnService::new(
        log_store,
        report_store.clone(),
        generator,
        config.turn_limit,
    );
    let reports = ReportService::new(report_store, config.tie_break);
    let pipeline = PipelineExecutor::new(transcriber, turns.clone(), synthesizer);

    let state = AppState {
        turns,
        reports,
        pipeline,
        stream_guard: StreamGuard::new(),
    };

    // ── Router ────────────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/api/chat/sessions", post(create_session_handler))
        .route("/api/chat", post(turn_handler))
        .route("/api/chat/stream", post(stream_turn_handler))
        .route("/api/chat/{session_id}/messages", get(list_messages_handler))
        .route("/api/voice", post(submit_voice_handler))
        .route("/api/voice/{task_id}", get(poll_voice_handler))
        .route("/api/reports", post(create_report_handler))
        .route("/api/reports/{id}", get(get_report_handler))
        .route("/api/reports/{id}/risks/{modality}", put(set_risk_handler))
        .route("/api/reports/{id}/finalize", post(finalize_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
