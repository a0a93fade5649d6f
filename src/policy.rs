/// Termination policy: translate "cap exceeded" into the right terminal
/// outcome and deliver it to the run.
use crate::watchdog::RunHandle;
use serde::Serialize;

/// Terminal outcome forced onto a run when its log exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Stop the run and report it as aborted.
    Abort,
    /// Stop the run and report it as failed.
    Fail,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Abort => write!(f, "abort"),
            RunOutcome::Fail => write!(f, "fail"),
        }
    }
}

/// Pick the outcome to request when the cap is crossed.
pub fn outcome_for(fail_on_exceed: bool) -> RunOutcome {
    if fail_on_exceed {
        RunOutcome::Fail
    } else {
        RunOutcome::Abort
    }
}

/// Deliver the termination request to the run.
///
/// The caller has already checked `handle.is_terminated()` in the same
/// check; the narrow window between that read and this call is accepted
/// because the host's termination request is idempotent.
pub fn apply(handle: &dyn RunHandle, outcome: RunOutcome) -> std::io::Result<()> {
    handle.request_termination(outcome)
}
