/// Log-size watchdog: one periodic check loop bound to one task run.
///
/// Armed at run start when the resolved cap is positive. Each check reads
/// the run's current log size and, once it exceeds the cap, requests
/// termination with the configured outcome. Disarmed unconditionally at run
/// end; a leaked guard disarms on drop.
use crate::policy::{self, RunOutcome};
use crate::threshold::BYTES_PER_MB;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Host-side view of one running task, shared with the watchdog.
///
/// The watchdog only calls these operations; it never owns or locks the
/// run. All three must be safe to call concurrently with whatever else the
/// host does to the same run.
pub trait RunHandle: Send + Sync {
    /// Current size of the run's output log, in bytes.
    ///
    /// Monotonically non-decreasing while the run is live; may fail
    /// transiently (the watchdog skips that check and tries again).
    fn current_log_size(&self) -> io::Result<u64>;

    /// Whether some actor already ended the run.
    fn is_terminated(&self) -> bool;

    /// Request that the run end with `outcome`. Idempotent on the host
    /// side; the watchdog still never issues it twice itself.
    fn request_termination(&self, outcome: RunOutcome) -> io::Result<()>;
}

/// Immutable per-run watchdog settings, built once at run start.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// Effective cap in MB. Zero or negative disables the watchdog.
    pub threshold_mb: i64,
    /// Outcome to request when the cap is crossed.
    pub on_exceeded: RunOutcome,
    /// Delay before the first check.
    pub initial_delay: Duration,
    /// Period between subsequent checks.
    pub check_interval: Duration,
}

/// Handle to an armed (or no-op) watchdog.
///
/// Dropping the guard disarms it, so the recurring check can never outlive
/// the run even if the host forgets to disarm.
#[derive(Debug)]
pub struct WatchdogGuard {
    task: Option<JoinHandle<()>>,
}

impl WatchdogGuard {
    /// A guard with no scheduled check (disabled watchdog).
    pub fn noop() -> Self {
        Self { task: None }
    }

    /// Whether a check loop is currently scheduled.
    #[allow(dead_code)]
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Cancel all future checks.
    ///
    /// Never blocks on an in-flight check. Calling it again, or on a no-op
    /// guard, is a silent no-op.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("watchdog disarmed");
        }
    }
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Arm a watchdog for one run.
///
/// With a non-positive cap this schedules nothing and returns a no-op
/// guard. Otherwise a background task checks the log size at the configured
/// cadence until either the cap is crossed and termination is requested
/// (the loop then exits — later checks would be no-ops behind the
/// `is_terminated()` guard anyway) or the guard is disarmed. Checks for one
/// run are strictly sequential: a single task awaits each tick in turn.
pub fn arm(handle: Arc<dyn RunHandle>, config: WatchdogConfig) -> WatchdogGuard {
    if config.threshold_mb <= 0 {
        tracing::debug!(
            threshold_mb = config.threshold_mb,
            "log-size watchdog disabled"
        );
        return WatchdogGuard::noop();
    }

    let threshold_bytes = config.threshold_mb as u64 * BYTES_PER_MB;
    tracing::info!(
        threshold_mb = config.threshold_mb,
        on_exceeded = %config.on_exceeded,
        check_interval_ms = config.check_interval.as_millis() as u64,
        "log-size watchdog armed"
    );

    let task = tokio::spawn(check_loop(handle, config, threshold_bytes));
    WatchdogGuard { task: Some(task) }
}

async fn check_loop(handle: Arc<dyn RunHandle>, config: WatchdogConfig, threshold_bytes: u64) {
    // interval_at panics on a zero period; clamp a degenerate config.
    let period = config.check_interval.max(Duration::from_millis(1));
    let mut ticks = time::interval_at(Instant::now() + config.initial_delay, period);
    // A slow check delays the next tick rather than letting ticks pile up.
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;

        if handle.is_terminated() {
            // Another actor already ended the run; never re-trigger.
            continue;
        }

        let size = match handle.current_log_size() {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read log size, skipping check");
                continue;
            }
        };

        if size <= threshold_bytes {
            tracing::trace!(size, threshold_bytes, "log size under cap");
            continue;
        }

        tracing::info!(
            size,
            threshold_bytes,
            outcome = %config.on_exceeded,
            "max log size reached, terminating run"
        );
        match policy::apply(handle.as_ref(), config.on_exceeded) {
            Ok(()) => return,
            Err(e) => {
                // Stay armed: a later check retries while the run lives and
                // the log is still over the cap.
                tracing::warn!(error = %e, "termination request failed");
            }
        }
    }
}
