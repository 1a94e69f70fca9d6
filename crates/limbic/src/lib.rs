//! The limbic layer: pressure-based wakeups instead of cron.
//!
//! Each drive signal accumulates pressure from elapsed time and external
//! observations; the highest-pressure signal past its threshold wakes the
//! persona with a reason.  The layer itself never reasons about what to do —
//! it only decides when attention is due.

pub mod limbic;
pub mod pressure;
pub mod prompts;
pub mod providers;
pub mod signals;

pub use limbic::LimbicLayer;
pub use pressure::{
    InteroceptionState, InteroceptionStateStore, LimbicStatus, PressureAccumulator, PressureState,
    SignalStatus, seconds_since,
};
pub use providers::{
    ExternalStateProvider, FileStateProvider, NeutralStateProvider, OutputStats, PendingSummary,
};
pub use signals::{EmittedSignal, Signal, SignalConfig, SignalContext, default_signal_configs};
