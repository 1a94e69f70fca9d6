use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use magenta_config::AppConfig;
use magenta_flow::{
    AgentStateStore, DecisionPolicy, MemoryPolicy, OutboxStore, PreflightPolicy, RunDeps,
    TelemetryStore, run_once, run_queue_once,
};
use magenta_limbic::{FileStateProvider, InteroceptionStateStore, LimbicLayer, Signal};
use magenta_mirror::{
    HttpPassageStore, HttpPersonaGateway, PassageStore, PersonaGateway, push_state,
};
use magenta_runtime::{BaselineToolset, Heartbeat, HeartbeatOptions, classify_outcome};

#[derive(Debug, Parser)]
#[command(
    name = "magenta",
    version,
    about = "Autonomous persona orchestrator: pressure-based scheduling over a gated action pipeline"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/magenta.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one observe→decide→draft→preflight→commit pipeline pass.
    Run,
    /// Preflight queued drafts; the first successful commit ends the run.
    Queue {
        #[arg(long, default_value_t = 3)]
        max_items: usize,
    },
    /// Run the pressure-based scheduler loop.
    Heartbeat {
        /// Seconds between ticks (overrides the config file).
        #[arg(long)]
        tick_interval: Option<u64>,
        /// Run a single tick and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print scheduler status as JSON.
    Status,
    /// Suppress all signals for a number of hours.
    Quiet { hours: f64 },
    /// Clear quiet mode.
    ClearQuiet,
    /// Force-emit a signal and wake the persona with it.
    ForceSignal { name: String },
    /// Zero all pressures and pending counts, keeping emission history.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn state_dir(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.store.state_dir)
}

fn agent_state_store(config: &AppConfig) -> AgentStateStore {
    AgentStateStore::new(state_dir(config).join("agent_state.json"))
}

fn telemetry_store(config: &AppConfig) -> TelemetryStore {
    TelemetryStore::new(state_dir(config).join("telemetry.jsonl"))
}

fn outbox_store(config: &AppConfig) -> Result<OutboxStore> {
    OutboxStore::new(&config.store.outbox_dir)
}

fn build_limbic(config: &AppConfig) -> LimbicLayer {
    let store = InteroceptionStateStore::new(state_dir(config).join("interoception.json"));
    let provider = FileStateProvider::new(
        state_dir(config).join("agent_state.json"),
        state_dir(config).join("telemetry.jsonl"),
    );
    LimbicLayer::new(store, None, Arc::new(provider))
}

fn remote_clients(
    config: &AppConfig,
) -> Result<(Arc<dyn PassageStore>, Arc<dyn PersonaGateway>)> {
    config.require_remote()?;
    let timeout = Duration::from_secs(config.remote.timeout_seconds);
    let passages = HttpPassageStore::new(
        &config.remote.base_url,
        &config.remote.api_key,
        &config.remote.agent_id,
        timeout,
    )?;
    let persona = HttpPersonaGateway::new(
        &config.remote.base_url,
        &config.remote.api_key,
        &config.remote.agent_id,
        timeout,
    )?;
    Ok((Arc::new(passages), Arc::new(persona)))
}

async fn run_pipeline_once(config: &AppConfig) -> Result<()> {
    let toolset = BaselineToolset::new(
        DecisionPolicy::from_config(&config.policy),
        MemoryPolicy::default(),
        Default::default(),
    );
    let state_store = agent_state_store(config);
    let telemetry = telemetry_store(config);
    let outbox = outbox_store(config)?;
    let preflight = PreflightPolicy::from_config(&config.policy, &config.store.state_dir);
    let deps = RunDeps {
        toolset: &toolset,
        state_store: &state_store,
        telemetry: &telemetry,
        outbox: &outbox,
        preflight: &preflight,
    };
    run_once(&deps).await?;
    println!("pipeline run complete");
    Ok(())
}

async fn run_queue(config: &AppConfig, max_items: usize) -> Result<()> {
    let toolset = BaselineToolset::new(
        DecisionPolicy::from_config(&config.policy),
        MemoryPolicy::default(),
        Default::default(),
    );
    let state_store = agent_state_store(config);
    let telemetry = telemetry_store(config);
    let outbox = outbox_store(config)?;
    let preflight = PreflightPolicy::from_config(&config.policy, &config.store.state_dir);
    let deps = RunDeps {
        toolset: &toolset,
        state_store: &state_store,
        telemetry: &telemetry,
        outbox: &outbox,
        preflight: &preflight,
    };
    run_queue_once(&deps, max_items).await?;
    println!("queue run complete");
    Ok(())
}

async fn run_heartbeat(config: &AppConfig, tick_interval: Option<u64>, once: bool) -> Result<()> {
    let (passages, persona) = remote_clients(config)?;
    let limbic = build_limbic(config);

    let mut options = HeartbeatOptions::from_config(config);
    if let Some(seconds) = tick_interval {
        options.tick_interval = Duration::from_secs(seconds);
    }
    options.once = once;

    let toolset = BaselineToolset::new(
        DecisionPolicy::from_config(&config.policy),
        MemoryPolicy::default(),
        Default::default(),
    )
    .with_passages(passages.clone());

    let heartbeat = Heartbeat::new(
        limbic,
        passages,
        persona,
        Arc::new(toolset),
        agent_state_store(config),
        outbox_store(config)?,
        telemetry_store(config),
        PreflightPolicy::from_config(&config.policy, &config.store.state_dir),
        state_dir(config).join("sync_state.json"),
        options,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_termination().await;
        let _ = shutdown_tx.send(true);
    });

    heartbeat.run(shutdown_rx).await
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};
    let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };
    let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Push local interoception state to the remote mirror when credentials are
/// configured; quiet commands still work offline.
async fn push_if_remote(config: &AppConfig, limbic: &LimbicLayer) {
    let Ok((passages, _)) = remote_clients(config) else {
        println!("(remote not configured; change is local only until the next heartbeat sync)");
        return;
    };
    if let Err(err) = push_state(passages.as_ref(), &limbic.accumulator.state).await {
        eprintln!("warning: failed to push state to remote: {err}");
    }
}

async fn run_force_signal(config: &AppConfig, name: &str) -> Result<()> {
    let Some(signal) = Signal::parse(name) else {
        bail!(
            "unknown signal '{name}'; expected one of: {}",
            Signal::ALL.map(|s| s.as_str()).join(", ")
        );
    };
    if !signal.is_emittable() {
        bail!("'{name}' is a suppression sentinel and cannot be forced");
    }

    let mut limbic = build_limbic(config);
    let emitted = limbic.force_signal(signal, "manual_force");
    println!("forced: {emitted}");

    match remote_clients(config) {
        Ok((passages, persona)) => {
            let prompt = limbic.prompt_for_signal(&emitted);
            match persona.send_prompt(&prompt).await {
                Ok(response) => {
                    let outcome = classify_outcome(&response);
                    limbic.record_action(signal, outcome);
                    println!("persona outcome: {outcome}");
                }
                Err(err) => {
                    limbic.record_action(signal, "error");
                    eprintln!("persona dispatch failed: {err}");
                }
            }
            if let Err(err) = push_state(passages.as_ref(), &limbic.accumulator.state).await {
                eprintln!("warning: failed to push state to remote: {err}");
            }
        }
        Err(_) => println!("(remote not configured; signal recorded locally)"),
    }
    Ok(())
}

fn run_reset(config: &AppConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("reset zeroes all pressures; pass --yes to confirm");
    }

    let store = InteroceptionStateStore::new(state_dir(config).join("interoception.json"));
    let mut state = store.load();
    for pressure_state in state.pressures.values_mut() {
        pressure_state.pressure = 0.0;
        pressure_state.known_pending.clear();
    }
    store.save(&state)?;
    println!("pressures and pending counts cleared");

    // Keep the sync snapshot consistent with the cleared pending counts.
    let snapshot_path = state_dir(config).join("sync_state.json");
    if let Ok(raw) = std::fs::read_to_string(&snapshot_path) {
        if let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&raw) {
            if let Some(object) = value.as_object_mut() {
                object.insert("pending".to_string(), serde_json::json!({}));
                object.insert(
                    "timestamp".to_string(),
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                );
                if let Ok(rendered) = serde_json::to_string_pretty(&value) {
                    let _ = std::fs::write(&snapshot_path, rendered);
                    println!("sync snapshot pending cleared");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::Run => run_pipeline_once(&config).await?,
        Commands::Queue { max_items } => run_queue(&config, max_items).await?,
        Commands::Heartbeat {
            tick_interval,
            once,
        } => run_heartbeat(&config, tick_interval, once).await?,
        Commands::Status => {
            let limbic = build_limbic(&config);
            let status = limbic.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Quiet { hours } => {
            if hours <= 0.0 {
                bail!("quiet duration must be positive (got {hours})");
            }
            let mut limbic = build_limbic(&config);
            limbic.set_quiet_hours(hours);
            push_if_remote(&config, &limbic).await;
            println!("quiet mode enabled for {hours} hours");
        }
        Commands::ClearQuiet => {
            let mut limbic = build_limbic(&config);
            limbic.clear_quiet_hours();
            push_if_remote(&config, &limbic).await;
            println!("quiet mode disabled");
        }
        Commands::ForceSignal { name } => run_force_signal(&config, &name).await?,
        Commands::Reset { yes } => run_reset(&config, yes)?,
    }

    Ok(())
}
