use std::sync::Arc;

use tracing::info;

use crate::db::ReportStore;
use crate::errors::AppError;
use crate::models::{Modality, ModalityVerdict, Report, RiskTier};
use crate::risk::{aggregate, TieBreakPolicy};

/// Outcome of report finalization.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FinalizedReport {
    pub report_id: String,
    pub final_tier: RiskTier,
    pub narrative: String,
}

/// Records per-modality verdicts and finalizes reports. Finalization
/// requires all three modality verdicts; the final verdict is computed
/// once and only recomputed on explicit request.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn ReportStore>,
    tie_break: TieBreakPolicy,
}

impl ReportService {
    pub fn new(store: Arc<dyn ReportStore>, tie_break: TieBreakPolicy) -> Self {
        Self { store, tie_break }
    }

    pub async fn create_report(&self) -> Result<Report, AppError> {
        self.store.create().await
    }

    pub async fn get_report(&self, report_id: &str) -> Result<Report, AppError> {
        self.store
            .find(report_id)
            .await?
            .ok_or_else(|| AppError::ReportNotFound { id: report_id.to_string() })
    }

    pub async fn record_modality(
        &self,
        report_id: &str,
        modality: Modality,
        verdict: ModalityVerdict,
    ) -> Result<(), AppError> {
        self.store
            .set_modality_risk(report_id, modality, verdict)
            .await?;
        info!("Recorded {modality} verdict for report {report_id}");
        Ok(())
    }

    /// Combines the three modality verdicts into the final one. All three
    /// must be present; absent verdicts are a precondition failure, never
    /// silently defaulted. An already-finalized report is returned as-is
    /// unless `force` requests re-finalization.
    pub async fn finalize(&self, report_id: &str, force: bool) -> Result<FinalizedReport, AppError> {
        let report = self.get_report(report_id).await?;

        if let (Some(tier), Some(narrative), false) =
            (report.final_tier, report.narrative.as_ref(), force)
        {
            return Ok(FinalizedReport {
                report_id: report.id,
                final_tier: tier,
                narrative: narrative.clone(),
            });
        }

        let missing = |modality: Modality| AppError::MissingModality {
            report_id: report_id.to_string(),
            modality: modality.to_string(),
        };
        let questionnaire = report
            .verdict(Modality::Questionnaire)
            .ok_or_else(|| missing(Modality::Questionnaire))?;
        let drawing = report
            .verdict(Modality::Drawing)
            .ok_or_else(|| missing(Modality::Drawing))?;
        let conversation = report
            .verdict(Modality::Conversation)
            .ok_or_else(|| missing(Modality::Conversation))?;

        let final_tier = aggregate(
            questionnaire.tier,
            drawing.tier,
            conversation.tier,
            self.tie_break,
        );
        let narrative = compose_narrative(final_tier, questionnaire, drawing, conversation);

        self.store
            .finalize(report_id, final_tier, &narrative)
            .await?;
        info!("Finalized report {report_id} as {final_tier}");

        Ok(FinalizedReport {
            report_id: report_id.to_string(),
            final_tier,
            narrative,
        })
    }
}

fn compose_narrative(
    final_tier: RiskTier,
    questionnaire: &ModalityVerdict,
    drawing: &ModalityVerdict,
    conversation: &ModalityVerdict,
) -> String {
    format!(
        "Overall risk: {final_tier}.\n\
         Questionnaire ({}): {}\n\
         Drawing ({}): {}\n\
         Conversation ({}): {}",
        questionnaire.tier,
        questionnaire.finding,
        drawing.tier,
        drawing.finding,
        conversation.tier,
        conversation.finding,
    )
}
