//! Drive signal definitions and per-signal tuning.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal drive states that can wake the persona.
///
/// Each one means something beyond "time to check": `Social` is unanswered
/// interaction pressure, `Maintenance` is resource hygiene, `Uncanny` is the
/// startle reflex for pattern mismatches.  `Quiet` is a suppression
/// sentinel, never emitted as a wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Social,
    Curiosity,
    Maintenance,
    Boredom,
    Anxiety,
    Drift,
    Stale,
    Uncanny,
    Quiet,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Signal::Social,
        Signal::Curiosity,
        Signal::Maintenance,
        Signal::Boredom,
        Signal::Anxiety,
        Signal::Drift,
        Signal::Stale,
        Signal::Uncanny,
        Signal::Quiet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Social => "social",
            Signal::Curiosity => "curiosity",
            Signal::Maintenance => "maintenance",
            Signal::Boredom => "boredom",
            Signal::Anxiety => "anxiety",
            Signal::Drift => "drift",
            Signal::Stale => "stale",
            Signal::Uncanny => "uncanny",
            Signal::Quiet => "quiet",
        }
    }

    pub fn parse(name: &str) -> Option<Signal> {
        Signal::ALL
            .into_iter()
            .find(|signal| signal.as_str() == name)
    }

    pub fn is_emittable(self) -> bool {
        self != Signal::Quiet
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for one signal's accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Seconds after the last emission before pressure starts accumulating.
    pub base_interval_seconds: f64,
    /// Pressure gained per second once past the base interval.
    pub accumulation_rate: f64,
    pub decay_rate: f64,
    pub emit_threshold: f64,
    pub max_pressure: f64,
    /// Random variance applied to accumulation and thresholds, 0.0–1.0.
    pub jitter_factor: f64,
    /// Higher priority wins when several signals are ready at once.
    pub priority: i32,
    /// Cron floor: force an emission once this much time has passed.
    pub max_interval_seconds: Option<f64>,
}

impl SignalConfig {
    fn new(
        base_interval_seconds: f64,
        accumulation_rate: f64,
        decay_rate: f64,
        emit_threshold: f64,
        priority: i32,
        max_interval_seconds: Option<f64>,
    ) -> Self {
        Self {
            base_interval_seconds,
            accumulation_rate,
            decay_rate,
            emit_threshold,
            max_pressure: 1.5,
            jitter_factor: 0.15,
            priority,
            max_interval_seconds,
        }
    }
}

/// Default tuning.  Social interaction dominates day-to-day; uncanny and
/// anxiety outrank everything when they fire; boredom is deliberately slow.
pub fn default_signal_configs() -> HashMap<Signal, SignalConfig> {
    HashMap::from([
        (
            Signal::Social,
            SignalConfig::new(1200.0, 0.0008, 0.02, 0.7, 7, Some(7200.0)),
        ),
        (
            Signal::Curiosity,
            SignalConfig::new(3600.0, 0.0003, 0.015, 0.6, 4, Some(14400.0)),
        ),
        (
            Signal::Maintenance,
            SignalConfig::new(10800.0, 0.0001, 0.02, 0.75, 6, None),
        ),
        (
            Signal::Boredom,
            SignalConfig::new(14400.0, 0.0002, 0.01, 0.8, 2, Some(21600.0)),
        ),
        (
            Signal::Anxiety,
            SignalConfig::new(21600.0, 0.0001, 0.03, 0.8, 8, None),
        ),
        (
            Signal::Drift,
            SignalConfig::new(21600.0, 0.0001, 0.005, 0.7, 3, Some(43200.0)),
        ),
        (
            Signal::Stale,
            SignalConfig::new(7200.0, 0.0002, 0.01, 0.6, 4, Some(28800.0)),
        ),
        (
            Signal::Uncanny,
            SignalConfig::new(1800.0, 0.001, 0.05, 0.5, 9, None),
        ),
        (Signal::Quiet, {
            let mut quiet = SignalConfig::new(0.0, 0.0, 0.0001, 0.9, 10, None);
            quiet.jitter_factor = 0.0;
            quiet
        }),
    ])
}

/// Context attached to an emission so the wake prompt can explain itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalContext {
    pub pending: BTreeMap<String, i64>,
    pub last_outcomes: BTreeMap<String, String>,
    pub emission_count: u64,
    pub time_since_last_emission: Option<f64>,
}

/// A signal that crossed its threshold (or cron floor) this tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedSignal {
    pub signal: Signal,
    pub pressure: f64,
    pub reason: String,
    pub context: SignalContext,
    pub forced: bool,
}

impl fmt::Display for EmittedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let forced = if self.forced { " [FORCED]" } else { "" };
        write!(
            f,
            "{}{} (pressure={:.2}): {}",
            self.signal, forced, self.pressure, self.reason
        )
    }
}
