mod config;
mod lifecycle;
mod policy;
mod report;
mod session;
mod threshold;
mod watchdog;

use clap::Parser;
use config::LogcapConfig;
use lifecycle::RunLimits;
use session::RunStatus;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Runs a task under a log-size watchdog: spawn the command with its output
/// captured to a log file, check the log size on a fixed cadence, and
/// terminate the run if the log grows past the configured cap.
#[derive(Parser, Debug)]
#[command(name = "logcap", version, about)]
pub struct Cli {
    /// Task command and arguments (overrides config; put after `--`)
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "logcap.toml")]
    config: PathBuf,

    /// This run's log cap in MB; selects the run's own cap over the default
    #[arg(long)]
    max_log_mb: Option<i64>,

    /// Fail the run instead of aborting it when the cap is crossed
    #[arg(long)]
    fail: bool,

    /// Process-wide default cap in MB (overrides config)
    #[arg(long)]
    default_max_log_mb: Option<i64>,

    /// Log file path (overrides config)
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Seconds between watchdog checks (overrides config)
    #[arg(long)]
    check_interval_secs: Option<u64>,

    /// Write a JSON run report to this path (overrides config)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every watchdog decision)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress informational output, only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

/// Exit code when the watchdog failed the run.
const EXIT_FORCED_FAIL: i32 = 70;
/// Exit code when the watchdog aborted the run.
const EXIT_FORCED_ABORT: i32 = 130;
/// Exit code for configuration/usage errors.
const EXIT_USAGE: i32 = 2;

/// Merge CLI overrides with config into the resolved per-run limits.
///
/// Passing `--max-log-mb` selects the run's own cap, the same way ticking
/// the per-run box does in config.
fn effective_limits(cli: &Cli, config: &LogcapConfig) -> RunLimits {
    RunLimits {
        use_own: cli.max_log_mb.is_some() || config.limit.use_own,
        own_max_mb: cli.max_log_mb.unwrap_or(config.limit.max_log_mb),
        default_max_mb: cli
            .default_max_log_mb
            .unwrap_or(config.defaults.max_log_mb),
        fail_on_exceed: cli.fail || config.limit.fail_on_exceed,
    }
}

/// Map the run's fate to the process exit code.
///
/// A natural finish propagates the task's own code (1 when killed by an
/// unrelated signal); forced outcomes get distinct codes.
fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed { exit_code } => exit_code.unwrap_or(1),
        RunStatus::Failed => EXIT_FORCED_FAIL,
        RunStatus::Aborted => EXIT_FORCED_ABORT,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = if cli.config.exists() {
        match config::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "could not load config");
                std::process::exit(EXIT_USAGE);
            }
        }
    } else {
        tracing::debug!(
            path = %cli.config.display(),
            "config file not found, using defaults"
        );
        LogcapConfig::default()
    };

    if let Some((command, args)) = cli.command.split_first() {
        config.task.command = command.clone();
        config.task.args = args.to_vec();
    }
    if let Some(log_file) = &cli.log_file {
        config.task.log_file = log_file.clone();
    }
    if let Some(interval) = cli.check_interval_secs {
        config.watchdog.check_interval_secs = interval;
    }
    let report_path = cli.report.clone().or(config.report.path.clone());

    let limits = effective_limits(&cli, &config);
    let cap_mb = threshold::resolve(limits.use_own, limits.own_max_mb, limits.default_max_mb);
    let initial_delay = Duration::from_secs(config.watchdog.initial_delay_secs);
    let check_interval = Duration::from_secs(config.watchdog.check_interval_secs);

    if cli.dry_run {
        println!("logcap v{}", env!("CARGO_PKG_VERSION"));
        println!("Command:        {} {}", config.task.command, config.task.args.join(" "));
        println!("Log file:       {}", config.task.log_file.display());
        if cap_mb > 0 {
            println!("Log cap:        {} MB", cap_mb);
            println!(
                "On exceed:      {}",
                policy::outcome_for(limits.fail_on_exceed)
            );
            println!("Check interval: {}s", config.watchdog.check_interval_secs);
        } else {
            println!("Log cap:        disabled");
        }
        println!("Dry run mode — config validated, not running.");
        return;
    }

    if config.task.command.is_empty() {
        tracing::error!("no task command given (set [task] in config or pass one after --)");
        std::process::exit(EXIT_USAGE);
    }

    let result = match session::run_task(
        &config.task,
        limits,
        initial_delay,
        check_interval,
        &config.task.log_file,
    )
    .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "run did not complete");
            std::process::exit(1);
        }
    };

    if !cli.quiet {
        let verdict = match result.status {
            RunStatus::Completed { exit_code } => {
                format!("completed (exit code {:?})", exit_code)
            }
            RunStatus::Failed => "failed: log size cap exceeded".to_string(),
            RunStatus::Aborted => "aborted: log size cap exceeded".to_string(),
        };
        println!(
            "run {verdict}: {} bytes logged in {:.1}s ({})",
            result.log_bytes,
            result.duration.as_secs_f64(),
            result.log_file.display()
        );
    }

    if let Some(path) = report_path {
        let run_report = report::RunReport::from_result(&result, cap_mb);
        if let Err(e) = report::write(&path, &run_report) {
            tracing::warn!(error = %e, "could not write run report");
        }
    }

    std::process::exit(exit_code(result.status));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("logcap").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_max_log_mb_selects_own_cap() {
        let cli = cli(&["--max-log-mb", "3"]);
        let limits = effective_limits(&cli, &LogcapConfig::default());
        assert!(limits.use_own);
        assert_eq!(limits.own_max_mb, 3);
    }

    #[test]
    fn test_config_limits_pass_through_without_overrides() {
        let cli = cli(&[]);
        let mut config = LogcapConfig::default();
        config.limit.use_own = true;
        config.limit.max_log_mb = 7;
        config.limit.fail_on_exceed = true;
        config.defaults.max_log_mb = 4;

        let limits = effective_limits(&cli, &config);
        assert!(limits.use_own);
        assert_eq!(limits.own_max_mb, 7);
        assert_eq!(limits.default_max_mb, 4);
        assert!(limits.fail_on_exceed);
    }

    #[test]
    fn test_cli_fail_flag_overrides_config() {
        let cli = cli(&["--fail"]);
        let limits = effective_limits(&cli, &LogcapConfig::default());
        assert!(limits.fail_on_exceed);
    }

    #[test]
    fn test_cli_default_cap_override() {
        let cli = cli(&["--default-max-log-mb", "9"]);
        let limits = effective_limits(&cli, &LogcapConfig::default());
        assert!(!limits.use_own);
        assert_eq!(limits.default_max_mb, 9);
    }

    #[test]
    fn test_trailing_command_parses() {
        let cli = cli(&["--max-log-mb", "1", "--", "sh", "-c", "echo hi"]);
        assert_eq!(cli.command, vec!["sh", "-c", "echo hi"]);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            exit_code(RunStatus::Completed {
                exit_code: Some(42)
            }),
            42
        );
        assert_eq!(exit_code(RunStatus::Completed { exit_code: None }), 1);
        assert_eq!(exit_code(RunStatus::Failed), EXIT_FORCED_FAIL);
        assert_eq!(exit_code(RunStatus::Aborted), EXIT_FORCED_ABORT);
    }
}
