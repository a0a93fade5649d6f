/// Run lifecycle glue: arm the watchdog when a run starts, disarm it when
/// the run ends, and emit the final observed log size.
use crate::policy;
use crate::threshold;
use crate::watchdog::{self, RunHandle, WatchdogConfig, WatchdogGuard};
use std::sync::Arc;
use std::time::Duration;

/// Resolved per-run limit settings handed in by the host at run start.
///
/// How the boundary layer derives `use_own` (form field, CLI flag, config
/// key) is its own business; the core only sees the resolved boolean.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Use the run's own cap instead of the process-wide default.
    pub use_own: bool,
    /// The run's own cap in MB.
    pub own_max_mb: i64,
    /// Process-wide default cap in MB.
    pub default_max_mb: i64,
    /// Fail the run instead of aborting it when the cap is crossed.
    pub fail_on_exceed: bool,
}

/// Called at run start: resolve the effective cap and arm the watchdog.
///
/// The returned guard must be held for the duration of the run and handed
/// to [`on_run_end`] when the run finishes, whatever its fate.
pub fn on_run_start(
    handle: Arc<dyn RunHandle>,
    limits: RunLimits,
    initial_delay: Duration,
    check_interval: Duration,
) -> WatchdogGuard {
    let threshold_mb = threshold::resolve(limits.use_own, limits.own_max_mb, limits.default_max_mb);
    let config = WatchdogConfig {
        threshold_mb,
        on_exceeded: policy::outcome_for(limits.fail_on_exceed),
        initial_delay,
        check_interval,
    };
    watchdog::arm(handle, config)
}

/// Called at run end: disarm the watchdog unconditionally and report the
/// final observed log size.
///
/// Must run for every ending — normal completion, natural failure, or a
/// forced termination from any source — so a recurring check never leaks
/// past the run's lifetime.
pub fn on_run_end(mut guard: WatchdogGuard, handle: &dyn RunHandle) {
    guard.disarm();
    match handle.current_log_size() {
        Ok(size) => tracing::info!(final_log_bytes = size, "run ended"),
        Err(e) => tracing::warn!(error = %e, "run ended, final log size unavailable"),
    }
}
