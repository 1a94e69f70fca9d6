//! The observe→decide→draft→preflight→commit pipeline.
//!
//! Every side effect the persona performs flows through here: an observation
//! becomes candidate actions, one candidate becomes a draft in the outbox,
//! the draft passes the preflight gate, and only then does the commit
//! dispatcher touch the outside world.  A single run performs at most one
//! commit.

pub mod commit;
pub mod models;
pub mod outbox;
pub mod preflight;
pub mod runner;
pub mod salience;
pub mod state;
pub mod telemetry;
pub mod toolset;

pub use commit::{CommitDispatcher, CommitHandler};
pub use models::{
    ActionKind, ActionMetadata, ActorProfile, ActorRef, CandidateAction, CommitResult, Draft,
    DraftStatus, Notification, Observation, PostRef, PreflightResult, ReplyRef, ScoredAction,
    TelemetryEvent,
};
pub use outbox::OutboxStore;
pub use preflight::{PreflightPolicy, validate_draft};
pub use runner::{RunDeps, run_once, run_queue_once};
pub use salience::{JWeights, SalienceConfig, compute_j_score, compute_salience};
pub use state::{AgentState, AgentStateStore, OpenCommitment};
pub use telemetry::TelemetryStore;
pub use toolset::{DecisionPolicy, MemoryPolicy, Toolset, create_draft, pick_action, score_actions};
