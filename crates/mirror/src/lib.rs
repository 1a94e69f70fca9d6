//! State mirroring between the scheduler process and the remote agent
//! service.
//!
//! The remote side holds an archival passage store the out-of-process tool
//! runtime can read; the local side holds the JSON files the scheduler owns.
//! Reconciliation is per-signal and per-field, never whole-object, so two
//! writers converge instead of clobbering each other.

pub mod gateway;
pub mod memory;
pub mod passages;
pub mod snapshot;
pub mod sync;

pub use gateway::{HttpPersonaGateway, NullPersonaGateway, PersonaGateway};
pub use memory::{
    mirror_draft, purge_stale_draft_passages, sanitize_memory, update_core_memory,
    write_event_summary,
};
pub use passages::{HttpPassageStore, InMemoryPassageStore, Passage, PassageStore};
pub use snapshot::{SnapshotContext, SnapshotLimbic, SyncSnapshot, write_snapshot};
pub use sync::{
    INTEROCEPTION_STATE_MARKER, NOTIFICATION_DB_MARKER, fetch_processed_notifications,
    fetch_remote_state, merge_pull, pull_state, push_processed_notifications, push_state,
    sync_quiet,
};
