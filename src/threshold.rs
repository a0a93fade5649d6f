/// Threshold resolution: per-run override vs. process-wide default.
///
/// The cap is configured in whole megabytes. A zero or negative value means
/// "no limit" and disables the watchdog for that run.

/// Bytes in one megabyte, matching the unit the cap is configured in.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Resolve the effective log-size cap (in MB) for one run.
///
/// When `use_own` is true the run's own value is returned verbatim, even if
/// it is zero or negative — a configured 0 deliberately means "no limit".
/// Otherwise the process-wide default is returned verbatim, with the same
/// zero/negative semantics.
pub fn resolve(use_own: bool, own_mb: i64, default_mb: i64) -> i64 {
    if use_own {
        own_mb
    } else {
        default_mb
    }
}
