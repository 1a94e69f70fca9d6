//! Interoception state reconciliation against the remote passage store.
//!
//! One sentinel passage holds the serialized state.  Pull merges per signal
//! and per field by recency; push is delete-then-create, intentionally
//! non-atomic — a reader between the two sees "no remote state", which is
//! treated as keep-local.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use magenta_limbic::InteroceptionState;

use crate::passages::PassageStore;

/// Prefix marking the interoception state passage.
pub const INTEROCEPTION_STATE_MARKER: &str = "[INTEROCEPTION_STATE]";

/// Prefix reserved for the processed-notification fallback passage.
pub const NOTIFICATION_DB_MARKER: &str = "[NOTIFICATION_DB]";

/// Read the most recent state passage, if any.  Malformed remote state is
/// treated as absent; local state prevails.
pub async fn fetch_remote_state(store: &dyn PassageStore) -> Result<Option<InteroceptionState>> {
    let passages = store.list(INTEROCEPTION_STATE_MARKER, 10).await?;
    let mut candidates: Vec<_> = passages
        .into_iter()
        .filter(|p| p.text.starts_with(INTEROCEPTION_STATE_MARKER))
        .collect();
    candidates.sort_by_key(|p| p.effective_timestamp());
    let Some(latest) = candidates.pop() else {
        return Ok(None);
    };

    let json = latest.text[INTEROCEPTION_STATE_MARKER.len()..].trim();
    match serde_json::from_str(json) {
        Ok(state) => Ok(Some(state)),
        Err(err) => {
            warn!(%err, passage_id = %latest.id, "remote interoception state malformed, ignoring");
            Ok(None)
        }
    }
}

fn newer(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

/// Merge remote state into local, field by field:
/// - per signal, the side with the newer `last_updated` wins the scalar
///   fields;
/// - pending counts and outcomes are unioned with the remote overlay winning
///   key conflicts;
/// - counters take the max;
/// - `quiet_until` and `last_wake` take the newer non-null timestamp.
///
/// Applying the same remote state twice is a no-op after the first merge.
pub fn merge_pull(local: &mut InteroceptionState, remote: &InteroceptionState) {
    for (name, remote_ps) in &remote.pressures {
        match local.pressures.get_mut(name) {
            None => {
                local.pressures.insert(name.clone(), remote_ps.clone());
            }
            Some(local_ps) => {
                let remote_is_newer = match (local_ps.last_updated, remote_ps.last_updated) {
                    (Some(l), Some(r)) => r > l,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if remote_is_newer {
                    local_ps.pressure = remote_ps.pressure;
                    local_ps.last_updated = remote_ps.last_updated;
                    local_ps.last_emitted = remote_ps.last_emitted;
                    local_ps.last_action = remote_ps.last_action;
                }
                for (key, value) in &remote_ps.known_pending {
                    local_ps.known_pending.insert(key.clone(), *value);
                }
                for (key, value) in &remote_ps.last_outcomes {
                    local_ps.last_outcomes.insert(key.clone(), value.clone());
                }
                local_ps.emission_count = local_ps.emission_count.max(remote_ps.emission_count);
            }
        }
    }

    local.total_emissions = local.total_emissions.max(remote.total_emissions);
    local.quiet_until = newer(local.quiet_until, remote.quiet_until);
    local.last_wake = newer(local.last_wake, remote.last_wake);

    for (key, value) in &remote.anomaly_scores {
        local.anomaly_scores.insert(key.clone(), *value);
    }
    for (key, value) in &remote.output_stats {
        local.output_stats.insert(key.clone(), *value);
    }
}

/// Pull remote state into local.  Returns true when remote state existed.
pub async fn pull_state(store: &dyn PassageStore, local: &mut InteroceptionState) -> Result<bool> {
    match fetch_remote_state(store).await? {
        Some(remote) => {
            merge_pull(local, &remote);
            debug!("pulled remote interoception state");
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Replace the remote state passage: delete every sentinel passage, then
/// create one fresh.
pub async fn push_state(store: &dyn PassageStore, state: &InteroceptionState) -> Result<()> {
    let passages = store.list(INTEROCEPTION_STATE_MARKER, 10).await?;
    for passage in passages {
        if passage.text.starts_with(INTEROCEPTION_STATE_MARKER) {
            if let Err(err) = store.delete(&passage.id).await {
                warn!(%err, passage_id = %passage.id, "failed to delete stale state passage");
            }
        }
    }

    let value = serde_json::to_value(state)?;
    let json = serde_json::to_string_pretty(&value)?;
    store
        .create(
            &format!("{INTEROCEPTION_STATE_MARKER}\n{json}"),
            &["magenta".to_string(), "interoception".to_string()],
        )
        .await?;
    debug!("pushed interoception state to remote");
    Ok(())
}

/// Mirror the bounded processed-notification list so out-of-process tools
/// can dedupe without filesystem access.  Same delete-then-create discipline
/// as the state passage.
pub async fn push_processed_notifications(
    store: &dyn PassageStore,
    processed: &[String],
) -> Result<()> {
    let passages = store.list(NOTIFICATION_DB_MARKER, 10).await?;
    for passage in passages {
        if passage.text.starts_with(NOTIFICATION_DB_MARKER) {
            if let Err(err) = store.delete(&passage.id).await {
                warn!(%err, passage_id = %passage.id, "failed to delete stale notification passage");
            }
        }
    }

    let json = serde_json::to_string_pretty(processed)?;
    store
        .create(
            &format!("{NOTIFICATION_DB_MARKER}\n{json}"),
            &["magenta".to_string(), "notifications".to_string()],
        )
        .await?;
    Ok(())
}

/// Read the mirrored processed-notification list; absent or malformed means
/// no fallback available.
pub async fn fetch_processed_notifications(
    store: &dyn PassageStore,
) -> Result<Option<Vec<String>>> {
    let passages = store.list(NOTIFICATION_DB_MARKER, 10).await?;
    let mut candidates: Vec<_> = passages
        .into_iter()
        .filter(|p| p.text.starts_with(NOTIFICATION_DB_MARKER))
        .collect();
    candidates.sort_by_key(|p| p.effective_timestamp());
    let Some(latest) = candidates.pop() else {
        return Ok(None);
    };
    let json = latest.text[NOTIFICATION_DB_MARKER.len()..].trim();
    match serde_json::from_str(json) {
        Ok(ids) => Ok(Some(ids)),
        Err(err) => {
            warn!(%err, passage_id = %latest.id, "remote notification list malformed, ignoring");
            Ok(None)
        }
    }
}

/// Quiet-only sync, run every tick so external "go quiet" commands take
/// effect within one tick.  Returns true when local state changed.
pub async fn sync_quiet(store: &dyn PassageStore, local: &mut InteroceptionState) -> Result<bool> {
    let Some(remote) = fetch_remote_state(store).await? else {
        return Ok(false);
    };

    match (remote.quiet_until, local.quiet_until) {
        (Some(until), None) => {
            local.quiet_until = Some(until);
            info!(%until, "synced quiet mode from remote");
            Ok(true)
        }
        (None, Some(_)) => {
            local.quiet_until = None;
            info!("cleared quiet mode from remote sync");
            Ok(true)
        }
        _ => Ok(false),
    }
}
