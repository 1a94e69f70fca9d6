//! The heartbeat loop: tick the limbic layer, dispatch emissions, keep the
//! remote mirror fresh.
//!
//! Quiet mode is synced from remote every tick so external "go quiet"
//! commands take effect within one tick; the full state pull and push run
//! every N ticks, plus a push after every emission.  Downstream failures are
//! recorded, never raised — the loop only stops on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use magenta_config::AppConfig;
use magenta_flow::{
    AgentStateStore, OutboxStore, PreflightPolicy, RunDeps, TelemetryStore, Toolset, run_once,
    run_queue_once,
};
use magenta_limbic::{EmittedSignal, LimbicLayer, Signal};
use magenta_mirror::{
    PassageStore, PersonaGateway, SnapshotContext, SnapshotLimbic, SyncSnapshot, pull_state,
    purge_stale_draft_passages, push_processed_notifications, push_state, sync_quiet,
    write_snapshot,
};

use crate::dispatch::classify_outcome;

#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub tick_interval: Duration,
    pub full_sync_ticks: u64,
    pub cleanup_every_emissions: u64,
    pub queue_max_items: usize,
    /// Run a single tick and exit.
    pub once: bool,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            full_sync_ticks: 5,
            cleanup_every_emissions: 6,
            queue_max_items: 3,
            once: false,
        }
    }
}

impl HeartbeatOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.scheduler.tick_interval_seconds),
            full_sync_ticks: config.scheduler.full_sync_ticks,
            cleanup_every_emissions: config.scheduler.cleanup_every_emissions,
            ..Self::default()
        }
    }
}

pub struct Heartbeat {
    pub limbic: LimbicLayer,
    passages: Arc<dyn PassageStore>,
    persona: Arc<dyn PersonaGateway>,
    toolset: Arc<dyn Toolset>,
    state_store: AgentStateStore,
    outbox: OutboxStore,
    telemetry: TelemetryStore,
    preflight: PreflightPolicy,
    snapshot_path: PathBuf,
    options: HeartbeatOptions,
}

impl Heartbeat {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limbic: LimbicLayer,
        passages: Arc<dyn PassageStore>,
        persona: Arc<dyn PersonaGateway>,
        toolset: Arc<dyn Toolset>,
        state_store: AgentStateStore,
        outbox: OutboxStore,
        telemetry: TelemetryStore,
        preflight: PreflightPolicy,
        snapshot_path: PathBuf,
        options: HeartbeatOptions,
    ) -> Self {
        Self {
            limbic,
            passages,
            persona,
            toolset,
            state_store,
            outbox,
            telemetry,
            preflight,
            snapshot_path,
            options,
        }
    }

    fn run_deps(&self) -> RunDeps<'_> {
        RunDeps {
            toolset: self.toolset.as_ref(),
            state_store: &self.state_store,
            telemetry: &self.telemetry,
            outbox: &self.outbox,
            preflight: &self.preflight,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            tick_interval_seconds = self.options.tick_interval.as_secs(),
            quiet = self.limbic.accumulator.is_quiet(),
            "heartbeat starting"
        );

        // The persona may have gone quiet while this process was down; honor
        // that before the first push overwrites remote state.
        match sync_quiet(self.passages.as_ref(), &mut self.limbic.accumulator.state).await {
            Ok(true) => self.limbic.save_state(),
            Ok(false) => {}
            Err(err) => debug!(%err, "initial quiet sync failed"),
        }
        self.push_and_snapshot().await;

        let mut tick_count: u64 = 0;
        let mut last_sync_tick: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tick_count += 1;
            debug!(tick_count, "tick");

            match sync_quiet(self.passages.as_ref(), &mut self.limbic.accumulator.state).await {
                Ok(true) => self.limbic.save_state(),
                Ok(false) => {}
                Err(err) => debug!(%err, "quiet sync failed"),
            }

            if self.options.full_sync_ticks > 0 && tick_count % self.options.full_sync_ticks == 0 {
                match pull_state(self.passages.as_ref(), &mut self.limbic.accumulator.state).await {
                    Ok(true) => self.limbic.save_state(),
                    Ok(false) => {}
                    Err(err) => warn!(%err, "remote state pull failed"),
                }
            }

            if let Some(emitted) = self.limbic.tick() {
                info!(%emitted, "signal emitted");
                self.handle_signal(&emitted).await;
                self.push_and_snapshot().await;
                last_sync_tick = tick_count;
            } else if self.options.full_sync_ticks > 0
                && tick_count - last_sync_tick >= self.options.full_sync_ticks
            {
                self.push_and_snapshot().await;
                last_sync_tick = tick_count;
            }

            if self.options.once {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.tick_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("heartbeat stopped");
        Ok(())
    }

    /// Dispatch one emission: wake the persona with the signal prompt and
    /// record the outcome; maintenance-class signals also drive the queue
    /// and cleanup cycles.
    pub async fn handle_signal(&mut self, emitted: &EmittedSignal) {
        // Maintenance drains the queue before the persona wakes, so its
        // prompt describes the post-cleanup world.
        if emitted.signal == Signal::Maintenance {
            self.run_queue_cycle().await;
        }

        let prompt = self.limbic.prompt_for_signal(emitted);
        match self.persona.send_prompt(&prompt).await {
            Ok(response) => {
                let outcome = classify_outcome(&response);
                info!(signal = %emitted.signal, outcome, "persona responded");
                self.limbic.record_action(emitted.signal, outcome);
            }
            Err(err) => {
                warn!(signal = %emitted.signal, %err, "persona dispatch failed");
                self.limbic.record_action(emitted.signal, "error");
            }
        }

        // Social wakeups also drive a pipeline run so notifications get the
        // draft/preflight treatment and land in the processed set.
        if emitted.signal == Signal::Social {
            if let Err(err) = run_once(&self.run_deps()).await {
                warn!(%err, "pipeline run after social signal failed");
            }
        }

        if matches!(emitted.signal, Signal::Maintenance | Signal::Stale)
            && self.options.cleanup_every_emissions > 0
            && emitted.context.emission_count % self.options.cleanup_every_emissions == 0
        {
            self.run_cleanup_cycle().await;
        }
    }

    async fn run_queue_cycle(&self) {
        if let Err(err) = run_queue_once(&self.run_deps(), self.options.queue_max_items).await {
            warn!(%err, "queue cycle failed");
        }
    }

    async fn run_cleanup_cycle(&self) {
        match self.outbox.purge_stale(24) {
            Ok(purged) if purged > 0 => info!(purged, "purged stale local drafts"),
            Ok(_) => {}
            Err(err) => warn!(%err, "local outbox cleanup failed"),
        }
        match purge_stale_draft_passages(self.passages.as_ref(), 24).await {
            Ok(purged) if purged > 0 => info!(purged, "purged stale mirrored drafts"),
            Ok(_) => {}
            Err(err) => warn!(%err, "remote outbox cleanup failed"),
        }
    }

    async fn push_and_snapshot(&mut self) {
        if let Err(err) = push_state(self.passages.as_ref(), &self.limbic.accumulator.state).await {
            warn!(%err, "state push failed");
            return;
        }
        let agent_state = self.state_store.load();
        if let Err(err) = push_processed_notifications(
            self.passages.as_ref(),
            &agent_state.processed_notifications,
        )
        .await
        {
            warn!(%err, "processed-notification mirror failed");
        }
        self.write_sync_snapshot();
    }

    fn write_sync_snapshot(&self) {
        let agent_state = self.state_store.load();
        let limbic_state = &self.limbic.accumulator.state;
        let snapshot = SyncSnapshot {
            timestamp: Utc::now(),
            context: SnapshotContext {
                usage_pct: self.limbic.provider().context_usage(),
            },
            pending: limbic_state.pressure(Signal::Social).known_pending.clone(),
            processed_notifications_count: agent_state.processed_notifications.len(),
            last_commit_at: agent_state.last_commit_at,
            limbic: SnapshotLimbic {
                last_wake: limbic_state.last_wake,
                total_emissions: limbic_state.total_emissions,
                quiet_until: limbic_state.quiet_until,
            },
        };
        if let Err(err) = write_snapshot(&self.snapshot_path, &snapshot) {
            warn!(%err, "sync snapshot write failed");
        }
    }
}
