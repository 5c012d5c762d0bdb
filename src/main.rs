mod config;
mod monitor;
mod probe;
mod scheduler;
mod signals;
mod sync;

use clap::Parser;
use config::SyncConfig;
use monitor::Monitor;
use probe::SystemProbe;
use std::path::PathBuf;
use std::process::ExitCode;
use sync::GitSync;

/// Launch an application, keep its git working tree synced while it runs,
/// and push a final commit once it closes.
#[derive(Parser, Debug)]
#[command(name = "syncwatch", version, about)]
pub struct Cli {
    /// Config file path (.json, or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Periodic sync interval in seconds, 0 to only sync on exit (overrides config)
    #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
    interval: Option<i64>,

    /// Abort instead of continuing when the pre-launch pull fails (overrides config)
    #[arg(long)]
    abort_on_pull_failure: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (phase changes, individual git steps)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "syncwatch=debug"
        } else if self.quiet {
            "syncwatch=warn"
        } else {
            "syncwatch=info"
        }
    }

    fn apply_overrides(&self, config: &mut SyncConfig) {
        if let Some(interval) = self.interval {
            config.sync_interval_secs = interval;
        }
        if self.abort_on_pull_failure {
            config.abort_on_pull_failure = true;
        }
    }
}

fn print_settings(config: &SyncConfig) {
    println!("app-path:               {}", config.app_path);
    println!("app-args:               {:?}", config.app_args);
    println!("work-dir:               {}", config.work_dir.display());
    println!("commit-date-format:     {}", config.commit_date_format);
    println!("commit-message:         {}", config.commit_message);
    match config.sync_interval() {
        Some(interval) => println!("sync-interval:          {}s", interval.as_secs()),
        None => println!("sync-interval:          disabled (sync on exit only)"),
    }
    println!("sync-step-timeout:      {}s", config.sync_step_timeout_secs);
    println!("abort-on-pull-failure:  {}", config.abort_on_pull_failure);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match SyncConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            eprintln!("error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        print_settings(&config);
        println!("Dry run mode: config validated, not running.");
        return ExitCode::SUCCESS;
    }

    tracing::info!(
        os = std::env::consts::OS,
        app = %config.app_path,
        work_dir = %config.work_dir.display(),
        "syncwatch starting"
    );

    let git = GitSync::new(config.commit_message.clone(), config.step_timeout());
    let mut monitor = Monitor::new(config, SystemProbe, git);

    match monitor.run(signals::shutdown_signal()).await {
        Ok(summary) => {
            tracing::info!(
                pid = summary.pid,
                exit = ?summary.exit,
                last_state = ?summary.last_state,
                polls = summary.polls,
                periodic_syncs = summary.periodic_syncs,
                terminal_sync_failures = summary.terminal_sync_failures,
                "done"
            );
            if summary.exit == monitor::WatchExit::Interrupted {
                eprintln!(
                    "interrupted: application (pid {}) is still running and no longer synced",
                    summary.pid
                );
            }
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, phase = ?monitor.phase(), "aborted");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
