//! Headless Nebula client.
//!
//! Loads `config.ron`, applies CLI overrides, connects to the configured
//! server over TCP and keeps the session alive with periodic heartbeats
//! until the reconnect budget runs out or Ctrl-C is pressed. Edits to the
//! reconnect section of `config.ron` are picked up while running.
//!
//! Run with: `cargo run -p nebula-client -- --server 127.0.0.1 --port 7777 --reconnect -1`

mod handlers;
mod setup;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use nebula_config::{CliArgs, Config};
use nebula_net::{ConnectionState, SessionEvent, SessionManager, TcpTransport};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::handlers::ClientHandlers;

/// Interval between session polls.
const TICK: Duration = Duration::from_millis(16);
/// Interval between heartbeats while connected.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// How long to wait for the transport to confirm a shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Interval between checks of `config.ron` for edits.
const CONFIG_POLL: Duration = Duration::from_secs(2);

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = match args.config.clone() {
        Some(dir) => dir,
        None => Config::default_dir().unwrap_or_else(|e| {
            eprintln!("{e}, using current directory");
            std::path::PathBuf::from(".")
        }),
    };

    // Load or create config, then apply CLI overrides. The file contents are
    // kept separately so reloads compare like with like.
    let mut on_disk = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    let mut config = on_disk.clone();
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("nebula-net")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start network runtime: {e}");
            std::process::exit(1);
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Relaxed);
            }
        });
    }

    let transport =
        TcpTransport::with_frame_config(runtime.handle().clone(), setup::frame_config(&config));
    let target = setup::connect_target(&config);
    let budget = setup::reconnect_budget(&config);

    let mut session = SessionManager::new();
    session.set_backoff(setup::backoff(&config.reconnect));
    session.init(transport, target, budget);

    let handlers = ClientHandlers::new();
    handlers.install(&mut session);
    let commands: Vec<String> = session
        .registry()
        .registered_commands()
        .map(ToString::to_string)
        .collect();
    info!("Handlers registered for {}", commands.join(", "));

    let mut lifecycle = session.subscribe();
    session.connect();

    let mut next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
    let mut next_config_poll = Instant::now() + CONFIG_POLL;
    let mut shutdown_deadline: Option<Instant> = None;

    'run: loop {
        let now = Instant::now();
        session.poll_at(now);

        loop {
            match lifecycle.try_recv() {
                Ok(SessionEvent::Connected) => {
                    next_heartbeat = now + HEARTBEAT_INTERVAL;
                }
                Ok(SessionEvent::Reconnecting { attempt, delay }) => {
                    info!("Reconnect attempt {attempt} in {delay:?}");
                }
                Ok(SessionEvent::TransportError { .. }) => {}
                Ok(SessionEvent::Ended) => break 'run,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Missed {skipped} lifecycle notifications");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        if interrupted.swap(false, Ordering::Relaxed) && shutdown_deadline.is_none() {
            info!("Interrupted, closing session");
            session.shutdown();
            shutdown_deadline = Some(now + SHUTDOWN_GRACE);
        }

        if let Some(deadline) = shutdown_deadline
            && now >= deadline
        {
            warn!("Transport did not confirm shutdown in {SHUTDOWN_GRACE:?}");
            break;
        }

        if shutdown_deadline.is_none()
            && session.state() == ConnectionState::Connected
            && now >= next_heartbeat
        {
            if let Err(e) = handlers.send_heartbeat(&mut session) {
                warn!("Heartbeat failed: {e}");
            }
            next_heartbeat = now + HEARTBEAT_INTERVAL;
        }

        if now >= next_config_poll {
            match on_disk.reload(&config_dir) {
                Ok(Some(fresh)) => {
                    let mut effective = fresh.clone();
                    effective.apply_cli_overrides(&args);
                    setup::apply_reload(&mut session, &config, &effective);
                    // Only the reconnect section takes effect while running.
                    config.reconnect = effective.reconnect;
                    on_disk = fresh;
                }
                Ok(None) => {}
                Err(e) => debug!("Config not reloaded: {e}"),
            }
            next_config_poll = now + CONFIG_POLL;
        }

        std::thread::sleep(TICK);
    }

    handlers.uninstall(&mut session);
    let stats = handlers.stats();
    info!(
        "Session ended: {} heartbeats sent, {} acknowledged, {} notices",
        stats.heartbeats_sent(),
        stats.heartbeats_acked(),
        stats.notices()
    );

    runtime.shutdown_timeout(Duration::from_millis(500));
}
