#![forbid(unsafe_code)]

//! `agent-intercom` — AFK bridge daemon binary.
//!
//! Bootstraps configuration, the Slack chat transport, the Hook
//! Rendezvous and Control Plane sockets, and the AFK Manager that ties
//! them together, then waits for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_intercom::afk::AfkManager;
use agent_intercom::chat::slack::SlackTransport;
use agent_intercom::chat::ChatTransport;
use agent_intercom::config::GlobalConfig;
use agent_intercom::control::{spawn_control_server, AfkMode, ControlState};
use agent_intercom::hook::spawn_hook_server;
use agent_intercom::permission_cache::PermissionCache;
use agent_intercom::queue::RequestQueue;
use agent_intercom::{config_watcher, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-intercom", about = "AFK bridge daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the Hook Rendezvous socket path.
    #[arg(long)]
    hook_socket: Option<PathBuf>,

    /// Override the Control Plane socket path.
    #[arg(long)]
    control_socket: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-intercom bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials()?;
    if let Some(path) = args.hook_socket.clone() {
        config.hook_socket_path = Some(path);
    }
    if let Some(path) = args.control_socket.clone() {
        config.control_socket_path = Some(path);
    }
    info!(workspace = %config.workspace_root.display(), "configuration loaded");

    let ct = CancellationToken::new();
    let queue = Arc::new(Mutex::new(RequestQueue::new()));
    let mode = Arc::new(Mutex::new(AfkMode::Afk));

    let permission_cache_path = config
        .permission_cache_path
        .clone()
        .unwrap_or_else(|| config.runtime_dir().join("permissions.db"));
    let permission_cache = PermissionCache::open(
        permission_cache_path
            .to_str()
            .ok_or_else(|| AppError::Config("permission_cache_path is not valid UTF-8".into()))?,
    )
    .await?;
    info!(path = %permission_cache_path.display(), "permission rule cache opened");

    let transport = Arc::new(SlackTransport::new(
        &config.slack,
        config.timeouts.poll_error_cap,
        config.timeouts.backoff_cap_seconds,
    )?);
    transport.verify().await?;
    info!("slack transport verified");

    let afk_manager = Arc::new(AfkManager::new(
        Arc::clone(&transport),
        Arc::clone(&queue),
        Arc::clone(&mode),
        Some(permission_cache.clone()),
        Duration::from_secs(config.timeouts.injection_timeout_seconds),
    ));

    let (hook_events_tx, mut hook_events_rx) = mpsc::unbounded_channel();
    let hook_handle = spawn_hook_server(
        config.hook_socket_path(),
        config.runtime_dir().join("sessions"),
        Arc::clone(&queue),
        Arc::clone(&mode),
        Some(permission_cache),
        hook_events_tx,
        ct.clone(),
    )?;

    let control_state = Arc::new(ControlState {
        mode: Arc::clone(&mode),
        queue: Arc::clone(&queue),
        config_path: args.config.clone(),
        shutdown: ct.clone(),
    });
    let control_handle = spawn_control_server(config.control_socket_path(), control_state, ct.clone())?;

    let watcher_handle = config_watcher::spawn_watcher(args.config.clone(), ct.clone())
        .map_err(|err| AppError::Config(format!("failed to start config watcher: {err}")))?;

    let (chat_updates_tx, mut chat_updates_rx) = mpsc::unbounded_channel();
    let poll_handle = transport.spawn_poll_loop(chat_updates_tx, ct.clone());

    let hook_events_manager = Arc::clone(&afk_manager);
    let hook_events_ct = ct.clone();
    let hook_events_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = hook_events_ct.cancelled() => break,
                event = hook_events_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(err) = hook_events_manager.handle_hook_event(event).await {
                        error!(%err, "failed to handle hook event");
                    }
                }
            }
        }
    });

    let chat_updates_manager = Arc::clone(&afk_manager);
    let chat_updates_ct = ct.clone();
    let chat_updates_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = chat_updates_ct.cancelled() => break,
                update = chat_updates_rx.recv() => {
                    let Some(update) = update else { break };
                    if let Err(err) = chat_updates_manager.handle_update(update).await {
                        error!(%err, "failed to handle chat update");
                    }
                }
            }
        }
    });

    afk_manager.activate().await?;
    info!("agent-intercom ready");

    shutdown_signal().await;
    info!("shutdown signal received; shutting down");
    ct.cancel();

    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received; forcing exit");
        std::process::exit(1);
    });

    for handle in [hook_handle, control_handle, watcher_handle, poll_handle, hook_events_task, chat_updates_task] {
        if let Err(err) = handle.await {
            warn!(%err, "task did not shut down cleanly");
        }
    }

    info!("agent-intercom shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
