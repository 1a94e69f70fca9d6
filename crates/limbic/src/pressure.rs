//! Pressure accumulation and emission decisions.
//!
//! Pressure builds from elapsed time and external boosts, not schedules.
//! Jitter keeps the cadence organic; per-signal cooldown floors stop
//! re-firing loops; the cron floor guarantees an emission eventually.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::signals::{EmittedSignal, Signal, SignalConfig, SignalContext, default_signal_configs};

/// Seconds since a timestamp; infinite when the event never happened.
pub fn seconds_since(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match timestamp {
        Some(then) => (now - then).num_milliseconds() as f64 / 1000.0,
        None => f64::INFINITY,
    }
}

fn jittered(value: f64, jitter_factor: f64) -> f64 {
    if jitter_factor <= 0.0 {
        return value;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
    value * (1.0 + jitter)
}

/// Accumulator state for a single signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureState {
    pub pressure: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_emitted: Option<DateTime<Utc>>,
    /// Last time acting on this signal produced an outcome.
    pub last_action: Option<DateTime<Utc>>,
    pub emission_count: u64,
    pub known_pending: BTreeMap<String, i64>,
    pub last_outcomes: BTreeMap<String, String>,
}

/// Process-wide interoception state, persisted and mirrored remotely.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InteroceptionState {
    pub pressures: BTreeMap<String, PressureState>,
    pub quiet_until: Option<DateTime<Utc>>,
    pub last_wake: Option<DateTime<Utc>>,
    pub total_emissions: u64,
    pub anomaly_scores: BTreeMap<String, f64>,
    pub output_stats: BTreeMap<String, f64>,
}

impl InteroceptionState {
    pub fn pressure(&self, signal: Signal) -> PressureState {
        self.pressures
            .get(signal.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn pressure_mut(&mut self, signal: Signal) -> &mut PressureState {
        self.pressures
            .entry(signal.as_str().to_string())
            .or_default()
    }
}

/// Single-file JSON store; an unreadable file means fresh state.
#[derive(Debug, Clone)]
pub struct InteroceptionStateStore {
    path: PathBuf,
}

impl InteroceptionStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> InteroceptionState {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return InteroceptionState::default();
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "interoception state unreadable, starting fresh");
                InteroceptionState::default()
            }
        }
    }

    pub fn save(&self, state: &InteroceptionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value = serde_json::to_value(state)?;
        fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}

/// Per-signal status line for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SignalStatus {
    pub pressure: f64,
    pub threshold: Option<f64>,
    pub time_since_emission_seconds: Option<u64>,
    pub time_until_accumulation_seconds: u64,
    pub pending: BTreeMap<String, i64>,
    pub emission_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimbicStatus {
    pub quiet_mode: bool,
    pub quiet_until: Option<DateTime<Utc>>,
    pub total_emissions: u64,
    pub last_wake: Option<DateTime<Utc>>,
    pub signals: BTreeMap<String, SignalStatus>,
}

/// Owns the pressure math: accumulate, check, emit, reset.
#[derive(Debug)]
pub struct PressureAccumulator {
    pub configs: HashMap<Signal, SignalConfig>,
    pub state: InteroceptionState,
}

impl PressureAccumulator {
    pub fn new(configs: Option<HashMap<Signal, SignalConfig>>, state: InteroceptionState) -> Self {
        Self {
            configs: configs.unwrap_or_else(default_signal_configs),
            state,
        }
    }

    /// Advance one signal's pressure: time-based accumulation past the base
    /// interval (bounded by time since the last update so restarts don't
    /// double-count), jitter, external boost, clamp.
    pub fn update_pressure(&mut self, signal: Signal, external_boost: f64) -> f64 {
        let Some(config) = self.configs.get(&signal) else {
            return 0.0;
        };
        let config = config.clone();
        let now = Utc::now();
        let pressure_state = self.state.pressure_mut(signal);

        let time_since_update = seconds_since(pressure_state.last_updated, now);
        let time_since_emission = seconds_since(pressure_state.last_emitted, now);

        let base_accumulation = if time_since_emission > config.base_interval_seconds {
            let mut accumulation_time = time_since_emission - config.base_interval_seconds;
            if time_since_update.is_finite() {
                accumulation_time = accumulation_time.min(time_since_update);
            }
            jittered(
                accumulation_time * config.accumulation_rate,
                config.jitter_factor,
            )
        } else {
            0.0
        };

        let new_pressure =
            (pressure_state.pressure + base_accumulation + external_boost).min(config.max_pressure);
        pressure_state.pressure = new_pressure;
        pressure_state.last_updated = Some(now);
        new_pressure
    }

    /// Emission decision: `(should_emit, reason, forced)`.
    pub fn should_emit(&self, signal: Signal) -> (bool, String, bool) {
        let Some(config) = self.configs.get(&signal) else {
            return (false, "no_config".to_string(), false);
        };
        let pressure_state = self.state.pressure(signal);
        let now = Utc::now();
        let time_since_emission = seconds_since(pressure_state.last_emitted, now);

        if self.is_quiet() && signal != Signal::Quiet {
            return (false, "quiet_mode_active".to_string(), false);
        }

        // Cooldown floors against spam loops.  Uncanny and boredom are hard;
        // anxiety may break through when errors have already driven pressure
        // past 1.0.
        match signal {
            Signal::Uncanny => {
                let cooldown = 600.0;
                if time_since_emission < cooldown {
                    return (
                        false,
                        format!(
                            "uncanny_cooldown ({:.0}s remaining)",
                            cooldown - time_since_emission
                        ),
                        false,
                    );
                }
            }
            Signal::Anxiety => {
                let cooldown = 180.0;
                if time_since_emission < cooldown && pressure_state.pressure < 1.0 {
                    return (
                        false,
                        format!(
                            "anxiety_cooldown ({:.0}s remaining)",
                            cooldown - time_since_emission
                        ),
                        false,
                    );
                }
            }
            Signal::Boredom => {
                let cooldown = 1800.0;
                if time_since_emission < cooldown {
                    return (
                        false,
                        format!(
                            "boredom_cooldown ({:.0}s remaining)",
                            cooldown - time_since_emission
                        ),
                        false,
                    );
                }
            }
            _ => {}
        }

        if let Some(max_interval) = config.max_interval_seconds {
            if time_since_emission >= max_interval {
                return (
                    true,
                    format!("max_interval_exceeded ({time_since_emission:.0}s)"),
                    true,
                );
            }
        }

        let threshold = jittered(config.emit_threshold, config.jitter_factor);
        if pressure_state.pressure >= threshold {
            return (
                true,
                format!(
                    "pressure_threshold ({:.2} >= {:.2})",
                    pressure_state.pressure, threshold
                ),
                false,
            );
        }

        (false, "below_threshold".to_string(), false)
    }

    /// Emit: capture context, zero the pressure, stamp the clocks.
    pub fn emit_signal(&mut self, signal: Signal, reason: &str, forced: bool) -> EmittedSignal {
        let now = Utc::now();
        let pressure_state = self.state.pressure_mut(signal);
        let current_pressure = pressure_state.pressure;
        let time_since = seconds_since(pressure_state.last_emitted, now);

        let context = SignalContext {
            pending: pressure_state.known_pending.clone(),
            last_outcomes: pressure_state.last_outcomes.clone(),
            emission_count: pressure_state.emission_count,
            time_since_last_emission: time_since.is_finite().then_some(time_since),
        };

        pressure_state.pressure = 0.0;
        pressure_state.last_emitted = Some(now);
        pressure_state.emission_count += 1;

        self.state.total_emissions += 1;
        self.state.last_wake = Some(now);

        EmittedSignal {
            signal,
            pressure: current_pressure,
            reason: reason.to_string(),
            context,
            forced,
        }
    }

    pub fn is_quiet(&self) -> bool {
        match self.state.quiet_until {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    pub fn set_quiet(&mut self, duration_hours: f64) {
        let until = Utc::now() + Duration::seconds((duration_hours * 3600.0) as i64);
        self.state.quiet_until = Some(until);
        self.state.pressure_mut(Signal::Quiet).pressure = 1.0;
    }

    pub fn clear_quiet(&mut self) {
        self.state.quiet_until = None;
        self.state.pressure_mut(Signal::Quiet).pressure = 0.0;
    }

    pub fn update_pending(&mut self, signal: Signal, pending: BTreeMap<String, i64>) {
        self.state.pressure_mut(signal).known_pending = pending;
    }

    pub fn update_outcome(&mut self, signal: Signal, outcome: &str) {
        let pressure_state = self.state.pressure_mut(signal);
        pressure_state
            .last_outcomes
            .insert(signal.as_str().to_string(), outcome.to_string());
        pressure_state.last_action = Some(Utc::now());
    }

    pub fn all_pressures(&self) -> BTreeMap<Signal, f64> {
        Signal::ALL
            .into_iter()
            .map(|signal| (signal, self.state.pressure(signal).pressure))
            .collect()
    }

    pub fn status(&self) -> LimbicStatus {
        let now = Utc::now();
        let mut signals = BTreeMap::new();
        for signal in Signal::ALL {
            let config = self.configs.get(&signal);
            let pressure_state = self.state.pressure(signal);
            let time_since_emission = seconds_since(pressure_state.last_emitted, now);
            let time_until_base = config
                .map(|c| (c.base_interval_seconds - time_since_emission).max(0.0))
                .unwrap_or(0.0);

            signals.insert(
                signal.as_str().to_string(),
                SignalStatus {
                    pressure: (pressure_state.pressure * 1000.0).round() / 1000.0,
                    threshold: config.map(|c| c.emit_threshold),
                    time_since_emission_seconds: time_since_emission
                        .is_finite()
                        .then_some(time_since_emission.round() as u64),
                    time_until_accumulation_seconds: if time_until_base.is_finite() {
                        time_until_base.round() as u64
                    } else {
                        0
                    },
                    pending: pressure_state.known_pending.clone(),
                    emission_count: pressure_state.emission_count,
                },
            );
        }

        LimbicStatus {
            quiet_mode: self.is_quiet(),
            quiet_until: self.state.quiet_until,
            total_emissions: self.state.total_emissions,
            last_wake: self.state.last_wake,
            signals,
        }
    }
}
