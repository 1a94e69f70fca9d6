//! The limbic layer: external boosts, the tick loop, and emission choice.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::pressure::{
    InteroceptionStateStore, LimbicStatus, PressureAccumulator, seconds_since,
};
use crate::prompts::default_prompt;
use crate::providers::ExternalStateProvider;
use crate::signals::{EmittedSignal, Signal, SignalConfig};

type PromptHandler = Box<dyn Fn(&EmittedSignal) -> String + Send + Sync>;

/// Decides when and why to wake the persona.  Runs on a lightweight
/// heartbeat; it does not reason about what to do, only whether internal
/// pressure demands attention.
pub struct LimbicLayer {
    store: InteroceptionStateStore,
    pub accumulator: PressureAccumulator,
    provider: Arc<dyn ExternalStateProvider>,
    handlers: HashMap<Signal, PromptHandler>,
}

impl LimbicLayer {
    pub fn new(
        store: InteroceptionStateStore,
        configs: Option<HashMap<Signal, SignalConfig>>,
        provider: Arc<dyn ExternalStateProvider>,
    ) -> Self {
        let state = store.load();
        Self {
            store,
            accumulator: PressureAccumulator::new(configs, state),
            provider,
            handlers: HashMap::new(),
        }
    }

    /// Override the default wake prompt for one signal.
    pub fn register_handler(
        &mut self,
        signal: Signal,
        handler: impl Fn(&EmittedSignal) -> String + Send + Sync + 'static,
    ) {
        self.handlers.insert(signal, Box::new(handler));
    }

    pub fn provider(&self) -> &Arc<dyn ExternalStateProvider> {
        &self.provider
    }

    /// External pressure boosts, additive on top of time-based accumulation.
    fn compute_external_boosts(&mut self) -> HashMap<Signal, f64> {
        let mut boosts = HashMap::new();

        let pending = self.provider.pending_notifications();
        let total_pending = pending.effective_total();
        // The pending counts are stored even at zero so wake prompts stay
        // accurate.
        self.accumulator
            .update_pending(Signal::Social, pending.category_counts());
        if total_pending > 0 {
            boosts.insert(Signal::Social, (total_pending as f64 * 0.05).min(0.3));
        }

        let context_usage = self.provider.context_usage();
        let mut maintenance = 0.0;
        if context_usage > 0.5 {
            maintenance += (context_usage - 0.5) * 0.5;
        }
        if context_usage > 0.7 {
            maintenance += 0.2;
        }
        if maintenance > 0.0 {
            boosts.insert(Signal::Maintenance, maintenance);
        }

        let error_count = self.provider.error_count_last_hour();
        if error_count > 0 {
            boosts.insert(Signal::Anxiety, (error_count as f64 * 0.1).min(0.4));
        }

        // Boredom only inflates once its own base interval has passed since
        // the last boredom emission, so the boost cannot re-inflate pressure
        // immediately after a wake.
        let now = Utc::now();
        let boredom_state = self.accumulator.state.pressure(Signal::Boredom);
        let time_since_boredom = seconds_since(boredom_state.last_emitted, now);
        if let Some(boredom_config) = self.accumulator.configs.get(&Signal::Boredom) {
            if time_since_boredom > boredom_config.base_interval_seconds {
                let idle = self.provider.time_since_last_action();
                let mut boredom = 0.0;
                if idle > 7200.0 {
                    boredom += 0.1;
                }
                if idle > 14400.0 {
                    boredom += 0.2;
                }
                if boredom > 0.0 {
                    boosts.insert(Signal::Boredom, boredom);
                }
            }
        }

        if let Some(stats) = self.provider.output_stats() {
            if stats.baseline_length > 0.0 {
                let deviation =
                    (stats.avg_length - stats.baseline_length).abs() / stats.baseline_length;
                if deviation > 0.3 {
                    boosts.insert(Signal::Drift, deviation * 0.3);
                }
            }
        }

        boosts
    }

    /// One heartbeat: update every pressure, emit at most one signal.
    pub fn tick(&mut self) -> Option<EmittedSignal> {
        if self.accumulator.is_quiet() {
            debug!("quiet mode active, suppressing signals");
            self.save_state();
            return None;
        }

        let boosts = self.compute_external_boosts();

        for signal in Signal::ALL {
            if !signal.is_emittable() {
                continue;
            }
            let boost = boosts.get(&signal).copied().unwrap_or(0.0);
            self.accumulator.update_pressure(signal, boost);
        }

        struct Candidate {
            signal: Signal,
            reason: String,
            forced: bool,
            pressure: f64,
            priority: i32,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for signal in Signal::ALL {
            if !signal.is_emittable() {
                continue;
            }
            let (should_emit, reason, forced) = self.accumulator.should_emit(signal);
            if should_emit {
                candidates.push(Candidate {
                    signal,
                    reason,
                    forced,
                    pressure: self.accumulator.state.pressure(signal).pressure,
                    priority: self
                        .accumulator
                        .configs
                        .get(&signal)
                        .map(|c| c.priority)
                        .unwrap_or(0),
                });
            }
        }

        if candidates.is_empty() {
            debug!("no signals ready to emit");
            self.save_state();
            return None;
        }

        candidates.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(
                b.pressure
                    .partial_cmp(&a.pressure)
                    .unwrap_or(Ordering::Equal),
            )
        });

        let top = &candidates[0];
        let emitted = self
            .accumulator
            .emit_signal(top.signal, &top.reason, top.forced);

        info!(signal = %emitted.signal, pressure = emitted.pressure, forced = emitted.forced, reason = %emitted.reason, "emitting signal");
        self.save_state();

        Some(emitted)
    }

    /// Bypass accumulation entirely; used by manual triggers.
    pub fn force_signal(&mut self, signal: Signal, reason: &str) -> EmittedSignal {
        let emitted = self.accumulator.emit_signal(signal, reason, true);
        self.save_state();
        emitted
    }

    pub fn set_quiet_hours(&mut self, duration_hours: f64) {
        self.accumulator.set_quiet(duration_hours);
        info!(hours = duration_hours, "quiet mode enabled");
        self.save_state();
    }

    pub fn clear_quiet_hours(&mut self) {
        self.accumulator.clear_quiet();
        info!("quiet mode disabled");
        self.save_state();
    }

    /// Record what acting on a signal led to; error outcomes feed the next
    /// anxiety boost through telemetry.
    pub fn record_action(&mut self, signal: Signal, outcome: &str) {
        self.accumulator.update_outcome(signal, outcome);
        self.save_state();
    }

    pub fn status(&self) -> LimbicStatus {
        self.accumulator.status()
    }

    pub fn prompt_for_signal(&self, emitted: &EmittedSignal) -> String {
        if let Some(handler) = self.handlers.get(&emitted.signal) {
            return handler(emitted);
        }
        default_prompt(emitted, self.accumulator.state.quiet_until)
    }

    /// Persistence failures log and continue; the next tick retries.
    pub fn save_state(&self) {
        if let Err(err) = self.store.save(&self.accumulator.state) {
            warn!(%err, "failed to persist interoception state");
        }
    }
}
