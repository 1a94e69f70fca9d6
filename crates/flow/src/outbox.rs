//! Filesystem outbox: one JSON file per draft, named by draft id.
//!
//! Drafts land here before any side effect and carry their status through
//! queued/committed/aborted transitions.  A periodic sweep purges terminal
//! failures older than a day.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::{Draft, DraftStatus};

pub fn new_draft_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[derive(Debug, Clone)]
pub struct OutboxStore {
    root: PathBuf,
}

impl OutboxStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn draft_path(&self, draft_id: &str) -> PathBuf {
        self.root.join(format!("{draft_id}.json"))
    }

    pub fn create(&self, draft: &mut Draft) -> Result<()> {
        if draft.id.is_empty() {
            draft.id = new_draft_id();
        }
        self.write(draft)
    }

    pub fn get(&self, draft_id: &str) -> Result<Option<Draft>> {
        let path = self.draft_path(draft_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write(&self, draft: &Draft) -> Result<()> {
        let path = self.draft_path(&draft.id);
        fs::write(path, serde_json::to_string_pretty(draft)?)?;
        Ok(())
    }

    fn update<F>(&self, draft_id: &str, apply: F) -> Result<Draft>
    where
        F: FnOnce(&mut Draft),
    {
        let Some(mut draft) = self.get(draft_id)? else {
            bail!("draft not found: {draft_id}");
        };
        apply(&mut draft);
        draft.updated_at = Utc::now();
        self.write(&draft)?;
        Ok(draft)
    }

    pub fn mark_queued(&self, draft_id: &str, reason: &str) -> Result<Draft> {
        self.update(draft_id, |draft| {
            draft.status = DraftStatus::Queued;
            draft.queue_reason = Some(reason.to_string());
        })
    }

    pub fn mark_aborted(&self, draft_id: &str, reason: &str) -> Result<Draft> {
        self.update(draft_id, |draft| {
            draft.status = DraftStatus::Aborted;
            draft.abort_reason = Some(reason.to_string());
        })
    }

    pub fn mark_error(&self, draft_id: &str, reason: &str) -> Result<Draft> {
        self.update(draft_id, |draft| {
            draft.status = DraftStatus::Error;
            draft.abort_reason = Some(reason.to_string());
        })
    }

    pub fn mark_committed(&self, draft_id: &str, external_uri: Option<&str>) -> Result<Draft> {
        self.update(draft_id, |draft| {
            draft.status = DraftStatus::Committed;
            draft.commit_uri = external_uri.map(str::to_string);
        })
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_by_status(&self, status: DraftStatus) -> Result<Vec<Draft>> {
        let mut drafts = Vec::new();
        for id in self.list_ids()? {
            if let Some(draft) = self.get(&id)? {
                if draft.status == status {
                    drafts.push(draft);
                }
            }
        }
        Ok(drafts)
    }

    /// Remove aborted/error drafts older than `max_age_hours`.  Committed
    /// drafts are kept as the durable record of what went out.
    pub fn purge_stale(&self, max_age_hours: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let mut purged = 0;
        for id in self.list_ids()? {
            let Some(draft) = self.get(&id)? else {
                continue;
            };
            if !matches!(draft.status, DraftStatus::Aborted | DraftStatus::Error) {
                continue;
            }
            if draft.updated_at >= cutoff {
                continue;
            }
            if fs::remove_file(self.draft_path(&id)).is_ok() {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
