/// Run report: optional JSON summary written after a run ends.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::policy::RunOutcome;
use crate::session::{RunResult, RunStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Run statuses as they appear in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
    Aborted,
}

/// The JSON payload written to the report file.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: ReportStatus,
    /// Exit code for a natural finish; None when killed by a signal.
    pub exit_code: Option<i32>,
    /// Outcome the watchdog forced onto the run, if any.
    pub forced_outcome: Option<RunOutcome>,
    pub log_bytes: u64,
    pub log_file: String,
    /// Effective cap in MB (<= 0 means the watchdog was disabled).
    pub threshold_mb: i64,
    pub duration_secs: f64,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Build a report from a finished run.
    pub fn from_result(result: &RunResult, threshold_mb: i64) -> Self {
        let (status, exit_code, forced_outcome) = match result.status {
            RunStatus::Completed { exit_code } => (ReportStatus::Completed, exit_code, None),
            RunStatus::Failed => (ReportStatus::Failed, None, Some(RunOutcome::Fail)),
            RunStatus::Aborted => (ReportStatus::Aborted, None, Some(RunOutcome::Abort)),
        };
        Self {
            status,
            exit_code,
            forced_outcome,
            log_bytes: result.log_bytes,
            log_file: result.log_file.display().to_string(),
            threshold_mb,
            duration_secs: result.duration.as_secs_f64(),
            pid: result.pid,
            started_at: result.started_at,
            finished_at: result.finished_at,
        }
    }
}

/// Errors that can occur while writing the report.
#[derive(Debug)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    Serialize { source: serde_json::Error },
    /// Failed to write the temp file.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to rename the temp file into place.
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Serialize { source } => {
                write!(f, "failed to serialize run report: {}", source)
            }
            ReportError::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            ReportError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Serialize { source } => Some(source),
            ReportError::Write { source, .. } => Some(source),
            ReportError::Rename { source, .. } => Some(source),
        }
    }
}

/// Atomically write the report to the given path.
///
/// Writes to a temporary file in the same directory, then renames to
/// ensure readers never see a partial write.
pub fn write(path: &Path, report: &RunReport) -> Result<(), ReportError> {
    let json =
        serde_json::to_string_pretty(report).map_err(|e| ReportError::Serialize { source: e })?;

    let dir = path.parent().unwrap_or(Path::new("."));
    let tmp_path = dir.join(format!(".run-report.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| ReportError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| ReportError::Rename {
        from: tmp_path,
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
