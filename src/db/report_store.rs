use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::db::ReportStore;
use crate::errors::AppError;
use crate::models::{Modality, ModalityVerdict, Report, RiskTier};

/// Postgres-backed report store. One row per report; modality verdicts
/// live in nullable column pairs.
#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn verdict_from_columns(
    tier: Option<String>,
    finding: Option<String>,
) -> Result<Option<ModalityVerdict>, AppError> {
    match tier {
        None => Ok(None),
        Some(t) => {
            let tier = RiskTier::try_from(t)
                .map_err(|e| AppError::Unexpected(format!("Bad stored tier: {e}")))?;
            Ok(Some(ModalityVerdict {
                tier,
                finding: finding.unwrap_or_default(),
            }))
        }
    }
}

fn row_to_report(row: sqlx::postgres::PgRow) -> Result<Report, AppError> {
    let get_text = |name: &str| -> Result<Option<String>, AppError> {
        row.try_get(name)
            .map_err(|e| AppError::db_query(format!("Failed to read {name}"), e))
    };

    let final_tier = match get_text("final_tier")? {
        None => None,
        Some(t) => Some(
            RiskTier::try_from(t)
                .map_err(|e| AppError::Unexpected(format!("Bad stored tier: {e}")))?,
        ),
    };

    Ok(Report {
        id: row
            .try_get("id")
            .map_err(|e| AppError::db_query("Failed to read id", e))?,
        questionnaire: verdict_from_columns(
            get_text("questionnaire_tier")?,
            get_text("questionnaire_finding")?,
        )?,
        drawing: verdict_from_columns(get_text("drawing_tier")?, get_text("drawing_finding")?)?,
        conversation: verdict_from_columns(
            get_text("conversation_tier")?,
            get_text("conversation_finding")?,
        )?,
        final_tier,
        narrative: get_text("narrative")?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
    })
}

const REPORT_COLUMNS: &str = "id, questionnaire_tier, questionnaire_finding, \
     drawing_tier, drawing_finding, conversation_tier, conversation_finding, \
     final_tier, narrative, created_at";

#[async_trait]
impl ReportStore for PgReportStore {
    async fn create(&self) -> Result<Report, AppError> {
        let report = Report::new();
        sqlx::query("INSERT INTO reports (id, created_at) VALUES ($1, $2)")
            .bind(&report.id)
            .bind(report.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create report {}: {e}", report.id);
                AppError::db_query("Failed to create report", e)
            })?;
        Ok(report)
    }

    async fn find(&self, id: &str) -> Result<Option<Report>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find report {id}: {e}");
            AppError::db_query(format!("Failed to find report {id}"), e)
        })?;

        row.map(row_to_report).transpose()
    }

    async fn set_modality_risk(
        &self,
        report_id: &str,
        modality: Modality,
        verdict: ModalityVerdict,
    ) -> Result<(), AppError> {
        // Column names derive from the closed Modality enum, not user input.
        let sql = format!(
            "UPDATE reports SET {m}_tier = $1, {m}_finding = $2 WHERE id = $3",
            m = modality.as_str()
        );
        let result = sqlx::query(&sql)
            .bind(verdict.tier.as_str())
            .bind(&verdict.finding)
            .bind(report_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to set {modality} risk for report {report_id}: {e}");
                AppError::db_query("Failed to set modality risk", e)
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::ReportNotFound { id: report_id.to_string() });
        }
        Ok(())
    }

    async fn finalize(
        &self,
        report_id: &str,
        tier: RiskTier,
        narrative: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE reports SET final_tier = $1, narrative = $2 WHERE id = $3",
        )
        .bind(tier.as_str())
        .bind(narrative)
        .bind(report_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to finalize report {report_id}: {e}");
            AppError::db_query("Failed to finalize report", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::ReportNotFound { id: report_id.to_string() });
        }
        Ok(())
    }
}
