//! Combines the three modality verdicts into one final risk tier.

use crate::models::RiskTier;

/// What to return when the three modality tiers are pairwise distinct and
/// no majority exists. The original scoring variants disagreed here, so
/// the fallback is policy, not law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakPolicy {
    /// Questionnaire verdict wins, then drawing, then conversation.
    ModalityPriority,
    /// A three-way split always resolves to `Caution`.
    AlwaysCaution,
}

/// Aggregates the three modality tiers. A tier appearing at least twice
/// wins outright; the three-distinct case falls back per `policy`.
///
/// Argument order is fixed: questionnaire, drawing, conversation. Order
/// only matters in the tie-break case.
pub fn aggregate(
    questionnaire: RiskTier,
    drawing: RiskTier,
    conversation: RiskTier,
    policy: TieBreakPolicy,
) -> RiskTier {
    if questionnaire == drawing || questionnaire == conversation {
        return questionnaire;
    }
    if drawing == conversation {
        return drawing;
    }
    // All three distinct: no majority exists.
    match policy {
        TieBreakPolicy::ModalityPriority => questionnaire,
        TieBreakPolicy::AlwaysCaution => RiskTier::Caution,
    }
}
