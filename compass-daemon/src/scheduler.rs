//! Background tasks
//!
//! The read cycle and the network rescan share one `Compass` behind a
//! mutex. Bus discovery and driver opening for the rescan happen with the
//! lock released, on tokio's blocking pool.

use compass_core::constants::timing;
use compass_core::{Compass, NetworkBus, RescanReport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type SharedCompass = Arc<Mutex<Compass>>;

/// Milliseconds since the daemon started
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Read cycle
// ============================================================================

pub async fn run_read_loop(compass: SharedCompass, clock: Clock, rate_hz: u32, shutdown: Arc<AtomicBool>) {
    let period = Duration::from_millis(1000 / u64::from(rate_hz.max(1)));
    let mut ticker = tokio::time::interval(period);
    let mut last_report: Option<u64> = None;
    let mut was_healthy = true;

    info!(rate_hz, "Compass read loop starting");
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let now = clock.now_ms();
        let healthy = compass.lock().read(now);
        if healthy != was_healthy {
            if healthy {
                info!("Primary compass healthy again");
            } else {
                warn!("Primary compass unhealthy");
            }
            was_healthy = healthy;
        }

        let report_due = last_report
            .map_or(true, |t| now.saturating_sub(t) >= timing::PREARM_REPORT_INTERVAL_MS);
        if report_due {
            last_report = Some(now);
            report_status(&compass.lock());
        }
    }
    info!("Compass read loop stopped");
}

/// Log pre-arm state and a one-line summary
pub fn report_status(compass: &Compass) {
    match compass.check_configured() {
        Ok(()) => debug!("Pre-arm: compasses configured"),
        Err(failure) => warn!("Pre-arm: {}", failure),
    }
    if !compass.consistent() {
        warn!("Pre-arm: compasses inconsistent");
    }
    info!(
        count = compass.count(),
        enabled = compass.num_enabled(),
        primary = compass.primary().get(),
        healthy_mask = compass.healthy_mask(),
        "Compass status"
    );
}

// ============================================================================
// Runtime rescan
// ============================================================================

/// One rescan attempt, holding the lock only for planning and applying
pub fn rescan_once<B>(
    compass: &Mutex<Compass>,
    bus: &mut B,
    now_ms: u64,
    armed: bool,
) -> compass_core::Result<Option<RescanReport>>
where
    B: NetworkBus + ?Sized,
{
    if !compass.lock().rescan_due(now_ms, armed) {
        return Ok(None);
    }

    let discovered = bus.discovered();
    let plan = compass.lock().plan_rescan(discovered);
    let drivers = plan.to_open.iter().filter_map(|&id| bus.open(id)).collect();
    let report = compass.lock().apply_rescan(plan, drivers)?;
    Ok(Some(report))
}

/// Rescan on the blocking pool so bus I/O never stalls the read loop
///
/// The bus moves into the blocking task and comes back with the result.
async fn rescan_async<B>(
    compass: SharedCompass,
    mut bus: B,
    now_ms: u64,
    armed: bool,
) -> Result<(B, compass_core::Result<Option<RescanReport>>), tokio::task::JoinError>
where
    B: NetworkBus + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = rescan_once(&compass, &mut bus, now_ms, armed);
        (bus, result)
    })
    .await
}

pub async fn run_rescan_loop<B>(
    compass: SharedCompass,
    mut bus: B,
    clock: Clock,
    armed: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) where
    B: NetworkBus + Send + 'static,
{
    let interval_ms = compass.lock().settings().rescan_interval_ms;
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));

    info!(interval_ms, "Compass rescan loop starting");
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let attempt = rescan_async(compass.clone(), bus, clock.now_ms(), armed.load(Ordering::SeqCst)).await;
        let result = match attempt {
            Ok((returned, result)) => {
                bus = returned;
                result
            }
            Err(e) => {
                error!("Compass rescan task panicked: {}", e);
                break;
            }
        };

        match result {
            Ok(Some(report)) if !report.is_empty() => log_rescan(&report),
            Ok(_) => {}
            Err(e) => error!("Compass rescan failed: {}", e),
        }
    }
    info!("Compass rescan loop stopped");
}

fn log_rescan(report: &RescanReport) {
    for (id, slot, rank) in &report.attached {
        info!(device_id = %id, slot = slot.get(), rank = rank.get(), "Compass plugged in");
    }
    for id in &report.detached {
        warn!(device_id = %id, "Compass unplugged");
    }
    for r in &report.replacements {
        info!(rank = r.rank.get(), replaced = %r.replaced, by = %r.by, "Compass replaced");
    }
    for id in &report.rejected {
        warn!(device_id = %id, "Compass rejected, no room");
    }
}
