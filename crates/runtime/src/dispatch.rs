//! Persona response classification.
//!
//! The response text is the only feedback channel after a wake, so a coarse
//! keyword heuristic maps it to an outcome recorded against the signal.
//! Error outcomes feed the next anxiety boost through telemetry.

const ERROR_MARKERS: &[&str] = &["error", "failed", "couldn't", "unable"];
const ENGAGEMENT_MARKERS: &[&str] = &["posted", "replied", "created", "sent", "completed"];

/// Map a persona response to an outcome tag.
pub fn classify_outcome(response: &str) -> &'static str {
    let lowered = response.to_lowercase();
    if ERROR_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return "error";
    }
    if ENGAGEMENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return "high_engagement";
    }
    "acknowledged"
}
