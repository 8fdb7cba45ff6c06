use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Modality, ModalityVerdict, Report, RiskTier};
use crate::routes::AppState;
use crate::service::report_service::FinalizedReport;

#[derive(Serialize)]
pub struct CreateReportResponse {
    pub report_id: String,
}

/// POST `/api/reports` — creates an empty report awaiting modality verdicts.
pub async fn create_report_handler(
    State(state): State<AppState>,
) -> Result<Json<CreateReportResponse>, AppError> {
    let report = state.reports.create_report().await?;
    Ok(Json(CreateReportResponse { report_id: report.id }))
}

/// GET `/api/reports/{id}` — current report snapshot.
pub async fn get_report_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Report>, AppError> {
    Ok(Json(state.reports.get_report(&id).await?))
}

#[derive(Deserialize)]
pub struct SetRiskRequest {
    pub tier: RiskTier,
    #[serde(default)]
    pub finding: String,
}

/// PUT `/api/reports/{id}/risks/{modality}` — records one modality verdict.
pub async fn set_risk_handler(
    Path((id, modality)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(req): Json<SetRiskRequest>,
) -> Result<Json<Report>, AppError> {
    let modality = Modality::try_from(modality)
        .map_err(|message| AppError::InvalidField { field_name: "modality".to_string(), message })?;
    state
        .reports
        .record_modality(&id, modality, ModalityVerdict { tier: req.tier, finding: req.finding })
        .await?;
    Ok(Json(state.reports.get_report(&id).await?))
}

#[derive(Deserialize)]
pub struct FinalizeQuery {
    #[serde(default)]
    pub force: bool,
}

/// POST `/api/reports/{id}/finalize` — aggregates the three modality
/// verdicts into the final tier. `?force=true` recomputes an existing one.
pub async fn finalize_handler(
    Path(id): Path<String>,
    Query(query): Query<FinalizeQuery>,
    State(state): State<AppState>,
) -> Result<Json<FinalizedReport>, AppError> {
    Ok(Json(state.reports.finalize(&id, query.force).await?))
}
