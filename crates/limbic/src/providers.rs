//! External state lookups the limbic layer uses for pressure boosts.
//!
//! Providers answer simple questions (how many pending items, how many
//! errors) without reasoning.  A missing or failing provider degrades to
//! neutral answers, which makes the corresponding boosts zero.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

/// Pending-notification counts grouped by platform.
#[derive(Debug, Clone, Default)]
pub struct PendingSummary {
    pub platforms: BTreeMap<String, BTreeMap<String, i64>>,
    pub total: i64,
    /// Subset of `total` the persona could actually act on, when known.
    pub actionable_total: Option<i64>,
}

impl PendingSummary {
    pub fn effective_total(&self) -> i64 {
        self.actionable_total.unwrap_or(self.total)
    }

    /// Flattened category counts stored against the social signal so wake
    /// prompts can show what is waiting.
    pub fn category_counts(&self) -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        for (platform, categories) in &self.platforms {
            for (category, count) in categories {
                counts.insert(format!("{platform}:{category}"), *count);
            }
        }
        counts.insert("total".to_string(), self.total);
        counts
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputStats {
    pub avg_length: f64,
    pub baseline_length: f64,
    pub sample_count: u64,
}

pub trait ExternalStateProvider: Send + Sync {
    fn pending_notifications(&self) -> PendingSummary {
        PendingSummary::default()
    }

    fn context_usage(&self) -> f64 {
        0.0
    }

    /// Seconds since the persona last committed an action; infinite when
    /// unknown.
    fn time_since_last_action(&self) -> f64 {
        f64::INFINITY
    }

    fn error_count_last_hour(&self) -> u32 {
        0
    }

    fn is_human_active(&self) -> bool {
        false
    }

    fn output_stats(&self) -> Option<OutputStats> {
        None
    }
}

/// Neutral answers for testing or standalone use; boosts stay at zero.
#[derive(Debug, Clone, Default)]
pub struct NeutralStateProvider;

impl ExternalStateProvider for NeutralStateProvider {
    fn time_since_last_action(&self) -> f64 {
        3600.0
    }
}

/// Reads the pipeline's persisted files.  Pending counts come from the
/// interaction surfaces and are not available here; surface glue wraps this
/// provider when it can supply them.
#[derive(Debug, Clone)]
pub struct FileStateProvider {
    agent_state_path: PathBuf,
    telemetry_path: PathBuf,
}

impl FileStateProvider {
    pub fn new(agent_state_path: impl Into<PathBuf>, telemetry_path: impl Into<PathBuf>) -> Self {
        Self {
            agent_state_path: agent_state_path.into(),
            telemetry_path: telemetry_path.into(),
        }
    }

    fn telemetry_events(&self) -> Vec<serde_json::Value> {
        let Ok(raw) = fs::read_to_string(&self.telemetry_path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    fn event_time(event: &serde_json::Value) -> Option<DateTime<Utc>> {
        let raw = event.get("timestamp")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl ExternalStateProvider for FileStateProvider {
    fn time_since_last_action(&self) -> f64 {
        let Ok(raw) = fs::read_to_string(&self.agent_state_path) else {
            return f64::INFINITY;
        };
        let Ok(state) = serde_json::from_str::<serde_json::Value>(&raw) else {
            return f64::INFINITY;
        };
        let Some(last_commit) = state.get("last_commit_at").and_then(|v| v.as_str()) else {
            return f64::INFINITY;
        };
        match DateTime::parse_from_rfc3339(last_commit) {
            Ok(then) => (Utc::now() - then.with_timezone(&Utc)).num_seconds() as f64,
            Err(_) => f64::INFINITY,
        }
    }

    fn error_count_last_hour(&self) -> u32 {
        let cutoff = Utc::now() - Duration::hours(1);
        self.telemetry_events()
            .iter()
            .filter(|event| Self::event_time(event).is_some_and(|at| at >= cutoff))
            .filter(|event| {
                matches!(
                    event.get("abort_reason").and_then(|v| v.as_str()),
                    Some("commit_failed") | Some("preflight_failed") | Some("error")
                )
            })
            .count() as u32
    }

    fn output_stats(&self) -> Option<OutputStats> {
        let events = self.telemetry_events();
        let cutoff = Utc::now() - Duration::hours(6);

        let mut all_lengths = Vec::new();
        let mut recent_lengths = Vec::new();
        for event in &events {
            let Some(length) = event.get("output_graphemes").and_then(|v| v.as_u64()) else {
                continue;
            };
            all_lengths.push(length as f64);
            if Self::event_time(event).is_some_and(|at| at >= cutoff) {
                recent_lengths.push(length as f64);
            }
        }

        if recent_lengths.is_empty() || all_lengths.is_empty() {
            return None;
        }

        Some(OutputStats {
            avg_length: recent_lengths.iter().sum::<f64>() / recent_lengths.len() as f64,
            baseline_length: all_lengths.iter().sum::<f64>() / all_lengths.len() as f64,
            sample_count: recent_lengths.len() as u64,
        })
    }
}
