//! Port L3 Daemon entry point
//!
//! Reconciles kernel addresses once at startup, then reapplies the
//! desired-state snapshot on SIGHUP until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sonic_portd::forwarding::{config_iprouting, ForwardingPaths};
use sonic_portd::store::Snapshot;
use sonic_portd::{
    diff_ports, DesiredStateStore, L3Sync, MemoryStore, NetlinkTransport, PortdConfig, Result,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// SONiC port L3 address daemon
#[derive(Parser, Debug)]
#[command(name = "portd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = sonic_portd::tables::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overrides the config file (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Desired-state snapshot, overrides the config file
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Run the startup reconciliation and exit
    #[arg(long)]
    reconcile_only: bool,
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(true).json())
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match PortdConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("portd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }
    if let Some(path) = args.snapshot.clone() {
        config.store.snapshot_path = path;
    }
    if let Err(e) = config.validate() {
        eprintln!("portd: {}", e);
        return ExitCode::FAILURE;
    }

    init_logging(&config.logging.level, args.json_logs);
    info!("Starting portd");

    match run(&config, args.reconcile_only).await {
        Ok(()) => {
            info!("portd exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("portd failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &PortdConfig, reconcile_only: bool) -> Result<()> {
    if config.routing.ip_forwarding {
        config_iprouting(&ForwardingPaths::default(), true);
    }

    let transport = NetlinkTransport::open(config.netlink.recv_buffer_size)?;
    let mut store = MemoryStore::load_or_empty(&config.store.snapshot_path)?;
    let mut sync = L3Sync::new(transport);

    sync.reconcile_on_init(&mut store);
    store.commit()?;

    if reconcile_only {
        sync.transport_mut().close();
        return Ok(());
    }

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(config.notification_poll_interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sync.transport_mut().drain_notifications() {
                    Ok(events) if !events.is_empty() => {
                        debug!(count = events.len(), "Drained kernel address notifications");
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to drain kernel notifications: {}", e),
                }
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading desired state");
                let snapshot = match Snapshot::load(&config.store.snapshot_path) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("Desired-state reload failed: {}", e);
                        continue;
                    }
                };
                let previous = store.replace_vrfs(snapshot.vrfs);
                let changes = diff_ports(&previous, store.vrfs());
                let stats = sync.apply_port_changes(&mut store, &changes);
                info!(changes = changes.len(), "Reload applied: {}", stats);
                if let Err(e) = store.commit() {
                    error!("Failed to commit desired state: {}", e);
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received");
                break;
            }
        }
    }

    sync.transport_mut().close();
    Ok(())
}
