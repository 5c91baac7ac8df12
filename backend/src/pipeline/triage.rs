use shared::{TriageLabel, TriageResult};

/// Probability at or above which the reaction is called positive.
pub const POSITIVE_THRESHOLD: f64 = 0.60;
/// Probability at or above which a manual palpation check is advised.
pub const MANUAL_CHECK_THRESHOLD: f64 = 0.40;

/// Fixed-threshold triage, evaluated in descending order with inclusive
/// lower bounds. Pure function of the probability.
pub fn classify(probability: f64) -> TriageResult {
    let (label, advice) = if probability >= POSITIVE_THRESHOLD {
        (TriageLabel::LikelyPositive, "Visible induration detected")
    } else if probability >= MANUAL_CHECK_THRESHOLD {
        (
            TriageLabel::ManualCheckRequired,
            "Visual features unclear — palpation recommended",
        )
    } else {
        (TriageLabel::Negative, "No visible induration detected")
    };
    TriageResult {
        label,
        advice: advice.to_string(),
        probability,
    }
}
