/// Single supervised run: spawn the task subprocess with output captured to
/// a log file, arm the watchdog, wait for exit, report how the run ended.
use crate::config::TaskConfig;
use crate::lifecycle::{self, RunLimits};
use crate::policy::RunOutcome;
use crate::watchdog::RunHandle;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The task exited on its own (code is None if killed by an unrelated
    /// signal).
    Completed { exit_code: Option<i32> },
    /// The watchdog forced the run to fail.
    Failed,
    /// The watchdog aborted the run.
    Aborted,
}

/// Result of one finished run.
#[derive(Debug)]
pub struct RunResult {
    pub status: RunStatus,
    /// Total bytes in the log file when the run ended.
    pub log_bytes: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    pub log_file: PathBuf,
    /// Child PID (for logging/diagnostics).
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Errors that can occur while running a task.
#[derive(Debug)]
pub enum RunError {
    /// Failed to create the log file.
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the task subprocess.
    Spawn { source: std::io::Error },
    /// Failed while waiting on the task subprocess.
    Io { source: std::io::Error },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::LogFile { path, source } => {
                write!(f, "failed to create log file {}: {}", path.display(), source)
            }
            RunError::Spawn { source } => {
                write!(f, "failed to spawn task subprocess: {}", source)
            }
            RunError::Io { source } => {
                write!(f, "I/O error during run: {}", source)
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::LogFile { source, .. } => Some(source),
            RunError::Spawn { source } => Some(source),
            RunError::Io { source } => Some(source),
        }
    }
}

/// Live view of one running task, shared with the watchdog.
///
/// Tracks the child's process group (equal to its PID, since the child is
/// spawned with `process_group(0)`) and the first forced outcome, if any.
pub struct ProcessRun {
    log_path: PathBuf,
    pgid: Pid,
    forced: OnceLock<RunOutcome>,
}

impl ProcessRun {
    fn new(log_path: PathBuf, pid: u32) -> Self {
        Self {
            log_path,
            pgid: Pid::from_raw(pid as i32),
            forced: OnceLock::new(),
        }
    }

    /// Outcome forced onto the run, if any. First request wins.
    pub fn forced_outcome(&self) -> Option<RunOutcome> {
        self.forced.get().copied()
    }
}

impl RunHandle for ProcessRun {
    fn current_log_size(&self) -> io::Result<u64> {
        std::fs::metadata(&self.log_path).map(|m| m.len())
    }

    fn is_terminated(&self) -> bool {
        self.forced.get().is_some()
    }

    fn request_termination(&self, outcome: RunOutcome) -> io::Result<()> {
        // First request wins; repeats keep the original outcome.
        let _ = self.forced.set(outcome);
        tracing::info!(pgid = self.pgid.as_raw(), %outcome, "killing task process group");
        match signal::killpg(self.pgid, Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Group already gone: the run is dead, treat as delivered.
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

/// Spawn the task, capture stdout+stderr to the log file, supervise it with
/// the watchdog, and return how the run ended.
///
/// The subprocess is spawned in its own process group (via
/// `process_group(0)`) so the watchdog can kill the entire group.
pub async fn run_task(
    task: &TaskConfig,
    limits: RunLimits,
    initial_delay: Duration,
    check_interval: Duration,
    log_path: &Path,
) -> Result<RunResult, RunError> {
    // Create/truncate the log file
    let log_file = std::fs::File::create(log_path).map_err(|e| RunError::LogFile {
        path: log_path.to_path_buf(),
        source: e,
    })?;
    // We need a second handle for stderr since File doesn't impl Clone
    let log_file_stderr = log_file.try_clone().map_err(|e| RunError::LogFile {
        path: log_path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(
        command = %task.command,
        args = ?task.args,
        log = %log_path.display(),
        "spawning supervised task"
    );

    let started_at = Utc::now();
    let start = Instant::now();

    let mut child = Command::new(&task.command)
        .args(&task.args)
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_stderr))
        .process_group(0) // New process group for clean kill
        .spawn()
        .map_err(|e| RunError::Spawn { source: e })?;

    let pid = child.id().unwrap_or(0);
    tracing::info!(pid, "task subprocess started");

    let run = Arc::new(ProcessRun::new(log_path.to_path_buf(), pid));
    let guard = lifecycle::on_run_start(run.clone(), limits, initial_delay, check_interval);

    let wait_result = child.wait().await;

    // Disarm whatever happened to the wait, then surface any wait error.
    lifecycle::on_run_end(guard, run.as_ref());
    let exit_status = wait_result.map_err(|e| RunError::Io { source: e })?;

    let duration = start.elapsed();
    let finished_at = Utc::now();
    let log_bytes = std::fs::metadata(log_path).map(|m| m.len()).unwrap_or(0);

    let status = match run.forced_outcome() {
        Some(RunOutcome::Fail) => RunStatus::Failed,
        Some(RunOutcome::Abort) => RunStatus::Aborted,
        None => RunStatus::Completed {
            exit_code: exit_status.code(),
        },
    };

    tracing::info!(
        status = ?status,
        log_bytes,
        duration_secs = duration.as_secs(),
        "run finished"
    );

    Ok(RunResult {
        status,
        log_bytes,
        duration,
        log_file: log_path.to_path_buf(),
        pid,
        started_at,
        finished_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(command: &str, args: &[&str]) -> TaskConfig {
        TaskConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            log_file: PathBuf::from("task.log"),
        }
    }

    fn no_limit() -> RunLimits {
        RunLimits {
            use_own: false,
            own_max_mb: 0,
            default_max_mb: 0,
            fail_on_exceed: false,
        }
    }

    fn own_limit(max_mb: i64, fail: bool) -> RunLimits {
        RunLimits {
            use_own: true,
            own_max_mb: max_mb,
            default_max_mb: 0,
            fail_on_exceed: fail,
        }
    }

    fn fast() -> (Duration, Duration) {
        (Duration::from_millis(20), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_run_completes_naturally_without_cap() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(&task("echo", &["hello"]), no_limit(), d, i, &log)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed { exit_code: Some(0) });
        assert!(result.log_bytes > 0);
        assert_eq!(std::fs::read_to_string(&log).unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(
            &task("sh", &["-c", "echo out-line; echo err-line >&2"]),
            no_limit(),
            d,
            i,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(result.status, RunStatus::Completed { exit_code: Some(0) });
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("out-line"));
        assert!(contents.contains("err-line"));
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(&task("sh", &["-c", "exit 42"]), no_limit(), d, i, &log)
            .await
            .unwrap();

        assert_eq!(
            result.status,
            RunStatus::Completed {
                exit_code: Some(42)
            }
        );
    }

    #[tokio::test]
    async fn test_run_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let err = run_task(&task("nonexistent-binary-xyz", &[]), no_limit(), d, i, &log)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_run_bad_log_path() {
        let (d, i) = fast();
        let err = run_task(
            &task("echo", &["hi"]),
            no_limit(),
            d,
            i,
            Path::new("/nonexistent-dir/impossible/out.log"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::LogFile { .. }));
    }

    #[tokio::test]
    async fn test_runaway_log_fails_the_run() {
        // Log blows past a 1MB cap, fail_on_exceed=true: the run is failed.
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(
            &task("sh", &["-c", "head -c 2097152 /dev/zero; sleep 30"]),
            own_limit(1, true),
            d,
            i,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        // Killed well before the trailing sleep finished.
        assert!(result.duration < Duration::from_secs(20));
        assert!(result.log_bytes > crate::threshold::BYTES_PER_MB);
    }

    #[tokio::test]
    async fn test_runaway_log_aborts_the_run() {
        // Same growth, fail_on_exceed=false: the run is aborted.
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(
            &task("sh", &["-c", "head -c 2097152 /dev/zero; sleep 30"]),
            own_limit(1, false),
            d,
            i,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(result.status, RunStatus::Aborted);
        assert!(result.duration < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_log_under_cap_completes_naturally() {
        // 5MB cap, log only reaches ~1MB: natural completion.
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(
            &task("sh", &["-c", "head -c 1048576 /dev/zero"]),
            own_limit(5, false),
            d,
            i,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(result.status, RunStatus::Completed { exit_code: Some(0) });
    }

    #[tokio::test]
    async fn test_default_cap_fails_runaway_run() {
        // use_own=false with a 1MB process-wide default.
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let (d, i) = fast();

        let result = run_task(
            &task("sh", &["-c", "head -c 2097152 /dev/zero; sleep 30"]),
            RunLimits {
                use_own: false,
                own_max_mb: 999,
                default_max_mb: 1,
                fail_on_exceed: true,
            },
            d,
            i,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_process_run_size_and_termination() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        std::fs::write(&log, b"12345").unwrap();

        // Spawn a short-lived child just to get a real (soon dead) group.
        let mut child = Command::new("true").process_group(0).spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        let run = ProcessRun::new(log.clone(), pid);
        assert_eq!(run.current_log_size().unwrap(), 5);
        assert!(!run.is_terminated());

        // Dead group: still reported as delivered, first outcome wins.
        run.request_termination(RunOutcome::Abort).unwrap();
        assert!(run.is_terminated());
        run.request_termination(RunOutcome::Fail).unwrap();
        assert_eq!(run.forced_outcome(), Some(RunOutcome::Abort));
    }

    #[tokio::test]
    async fn test_process_run_size_read_error_on_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let run = ProcessRun::new(dir.path().join("missing.log"), std::process::id());
        assert!(run.current_log_size().is_err());
    }
}
