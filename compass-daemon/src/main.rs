//! Compass Daemon (compassd)
//!
//! Boots the compass subsystem against a bus, then keeps it running:
//! - **Read cycle**: pulls samples at a fixed rate and tracks health
//! - **Hot-plug**: rescans the network bus while disarmed
//! - **Pre-arm**: logs configuration and consistency problems periodically
//!
//! Without real hardware the bus is simulated from a scenario file, or a
//! built-in scenario when none is given.

mod scenario;
mod scheduler;

use anyhow::Context;
use clap::Parser;
use compass_core::constants::timing;
use compass_core::{get_settings_path, load_settings, Compass, JsonFileStorage, TracingSink};
use parking_lot::Mutex;
use scenario::Scenario;
use scheduler::Clock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "compassd")]
#[command(version)]
#[command(about = "Compass identity, priority and hot-plug service")]
#[command(long_about = "Compass identity, priority and hot-plug service

Keeps every magnetometer bound to the same calibration slot and priority
rank across reboots, and attaches or replaces network sensors at runtime.

ENVIRONMENT VARIABLES:
    COMPASS_LOG=debug      Log filter (overridden by --log-level)")]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parameter store file
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Simulated hardware scenario (JSON)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Treat the vehicle as armed; suspends runtime rescans
    #[arg(long)]
    armed: bool,

    /// Forget sensors that are absent at boot
    #[arg(long)]
    reset_missing: bool,

    /// Log filter, e.g. "info" or "compass_core=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Exit after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

fn init_logging(args: &Args) -> String {
    let log_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("COMPASS_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    log_level
}

async fn wait_for_shutdown(duration: Option<u64>) {
    let timer = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("SIGNAL: Received interrupt - initiating shutdown");
        }
        _ = timer => {
            info!("Run duration elapsed - initiating shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    let args = Args::parse();
    let log_level = init_logging(&args);
    info!("STARTUP: compassd {} starting", VERSION);
    info!("STARTUP: Log level: {}", log_level);

    // Settings and store
    let settings_path = args.config.clone().unwrap_or_else(get_settings_path);
    let settings = load_settings(&settings_path)
        .with_context(|| format!("Failed to load settings from {:?}", settings_path))?;
    let store_path = args
        .store
        .clone()
        .unwrap_or_else(compass_core::constants::paths::default_store_path);
    let store = JsonFileStorage::open(&store_path)
        .with_context(|| format!("Failed to open parameter store {:?}", store_path))?;
    info!("STARTUP: Parameter store: {:?}", store_path);

    // Simulated hardware
    let world = match &args.scenario {
        Some(path) => Scenario::load(path).with_context(|| format!("Failed to load scenario {:?}", path))?,
        None => Scenario::default(),
    };
    let (mut bus, ids) = world.build();
    info!("STARTUP: Simulating {} sensors", ids.len());

    // Boot
    let clock = Clock::new();
    let mut compass = Compass::new(settings, Box::new(store), Arc::new(TracingSink))
        .context("Invalid compass settings")?;
    let report = compass
        .init(&mut bus, clock.now_ms())
        .context("Compass boot detection failed")?;
    for (id, slot, rank) in &report.assigned {
        info!(device_id = %id, slot = slot.get(), rank = rank.get(), "Compass bound");
    }
    for id in &report.overflow {
        info!(device_id = %id, "Compass kept as extra device");
    }
    for r in &report.replacements {
        info!(rank = r.rank.get(), replaced = %r.replaced, by = %r.by, "Compass replaced at boot");
    }

    if args.reset_missing {
        let removed = compass.reset_missing_ids().context("Failed to reset missing compasses")?;
        info!("Removed {} missing compasses", removed.len());
    }
    scheduler::report_status(&compass);

    // Run
    let compass = Arc::new(Mutex::new(compass));
    let shutdown = Arc::new(AtomicBool::new(false));
    let armed = Arc::new(AtomicBool::new(args.armed));

    let read_handle = tokio::spawn(scheduler::run_read_loop(
        compass.clone(),
        clock,
        timing::DEFAULT_READ_RATE_HZ,
        shutdown.clone(),
    ));
    let rescan_handle = tokio::spawn(scheduler::run_rescan_loop(
        compass.clone(),
        bus.clone(),
        clock,
        armed,
        shutdown.clone(),
    ));
    let world_handle = tokio::spawn(scenario::run_scenario(
        world,
        bus,
        ids,
        clock,
        shutdown.clone(),
    ));

    wait_for_shutdown(args.duration).await;

    shutdown.store(true, Ordering::SeqCst);
    for handle in [read_handle, rescan_handle, world_handle] {
        if let Err(e) = handle.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("SHUTDOWN: compassd stopped");
    Ok(())
}
