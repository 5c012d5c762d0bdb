/// Application lifecycle monitor: precheck the working tree, pull, launch the
/// application, poll it once per second while triggering periodic syncs, and run
/// exactly one terminal sync when the watch loop ends.
use crate::config::SyncConfig;
use crate::probe::{ProbeError, ProcessProbe, ProcessState};
use crate::scheduler::SyncScheduler;
use crate::sync::{StepOutcome, SyncAction, SyncReport};
use std::future::Future;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::Instant;

pub const EXIT_PRECHECK: u8 = 2;
pub const EXIT_LAUNCH: u8 = 3;
pub const EXIT_PULL: u8 = 4;
/// The monitor was stopped by a signal while the application was still running.
pub const EXIT_INTERRUPTED: u8 = 5;

/// Fixed liveness polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Monitor lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Prechecking,
    Launching,
    Watching,
    TerminalSync,
    Done,
    Aborted,
}

/// Last known state of the monitored application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopped,
    Unknown,
}

/// The launched application, owned by the monitor for one run.
#[derive(Debug)]
pub struct MonitoredProcess {
    pub pid: u32,
    pub state: RunState,
}

impl MonitoredProcess {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            state: RunState::Running,
        }
    }

    fn observe(&mut self, probed: &ProcessState) {
        self.state = match probed {
            ProcessState::Alive => RunState::Running,
            ProcessState::Dead => RunState::Stopped,
            ProcessState::Indeterminate(_) => RunState::Unknown,
        };
    }
}

/// Why the watch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchExit {
    /// The application exited.
    Exited,
    /// The process lookup failed, so the application's state can't be trusted.
    ProbeFailed(ProbeError),
    /// The monitor received SIGINT or SIGTERM.
    Interrupted,
}

/// What happened during a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub pid: u32,
    pub exit: WatchExit,
    pub last_state: RunState,
    pub polls: u64,
    pub periodic_syncs: u32,
    pub terminal_sync_failures: usize,
}

impl RunSummary {
    /// 0 once the application has closed (or can no longer be observed);
    /// `EXIT_INTERRUPTED` when a signal ended the watch first.
    pub fn exit_code(&self) -> u8 {
        match self.exit {
            WatchExit::Interrupted => EXIT_INTERRUPTED,
            WatchExit::Exited | WatchExit::ProbeFailed(_) => 0,
        }
    }
}

/// Fatal errors that abort the run before the application is watched.
#[derive(Debug)]
pub enum MonitorError {
    /// The working directory is not a usable git working tree.
    Precheck { work_dir: PathBuf, reason: String },
    /// The pre-launch pull failed and the config asks to abort on that.
    Pull { work_dir: PathBuf, detail: String },
    /// The application could not be started.
    Launch {
        app_path: String,
        source: std::io::Error,
    },
}

impl MonitorError {
    pub fn exit_code(&self) -> u8 {
        match self {
            MonitorError::Precheck { .. } => EXIT_PRECHECK,
            MonitorError::Launch { .. } => EXIT_LAUNCH,
            MonitorError::Pull { .. } => EXIT_PULL,
        }
    }
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Precheck { work_dir, reason } => {
                write!(f, "{} is not a usable working tree: {}", work_dir.display(), reason)
            }
            MonitorError::Pull { work_dir, detail } => {
                write!(f, "failed to pull {}: {}", work_dir.display(), detail)
            }
            MonitorError::Launch { app_path, source } => {
                write!(f, "failed to start application {}: {}", app_path, source)
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Launch { source, .. } => Some(source),
            MonitorError::Precheck { .. } | MonitorError::Pull { .. } => None,
        }
    }
}

/// Verify that `work_dir` exists and contains git metadata.
///
/// `.git` may be a directory or, for worktrees and submodules, a file.
pub fn precheck(work_dir: &Path) -> Result<(), MonitorError> {
    if !work_dir.is_dir() {
        return Err(MonitorError::Precheck {
            work_dir: work_dir.to_path_buf(),
            reason: "directory does not exist".to_string(),
        });
    }
    if !work_dir.join(".git").exists() {
        return Err(MonitorError::Precheck {
            work_dir: work_dir.to_path_buf(),
            reason: "no .git found; clone or init the repository first".to_string(),
        });
    }
    Ok(())
}

/// Start the application and return its PID without waiting for it.
///
/// The child runs in the working tree, with stdio detached, in its own process
/// group so a Ctrl-C aimed at the monitor does not reach it.
pub fn launch_app(config: &SyncConfig) -> Result<u32, MonitorError> {
    let child = Command::new(&config.app_path)
        .args(&config.app_args)
        .current_dir(&config.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| MonitorError::Launch {
            app_path: config.app_path.clone(),
            source: e,
        })?;
    Ok(child.id())
}

pub struct Monitor<P, S> {
    config: SyncConfig,
    probe: P,
    sync: S,
    poll_interval: Duration,
    phase: Phase,
}

impl<P: ProcessProbe, S: SyncAction> Monitor<P, S> {
    pub fn new(config: SyncConfig, probe: P, sync: S) -> Self {
        Self {
            config,
            probe,
            sync,
            poll_interval: POLL_INTERVAL,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        tracing::debug!(from = ?self.phase, to = ?next, "monitor phase change");
        self.phase = next;
    }

    /// Run the whole lifecycle. `shutdown` resolving ends the watch loop early;
    /// the terminal sync still runs.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<RunSummary, MonitorError> {
        self.enter(Phase::Prechecking);
        if let Err(e) = precheck(&self.config.work_dir) {
            self.enter(Phase::Aborted);
            return Err(e);
        }

        self.enter(Phase::Launching);
        let pid = match self.launch().await {
            Ok(pid) => pid,
            Err(e) => {
                self.enter(Phase::Aborted);
                return Err(e);
            }
        };

        self.enter(Phase::Watching);
        let mut process = MonitoredProcess::new(pid);
        let stats = self.watch(&mut process, shutdown).await;

        self.enter(Phase::TerminalSync);
        tracing::info!(pid, exit = ?stats.exit, "application watch ended, running final sync");
        let report = self.sync_cycle().await;
        log_report("terminal", &report);

        if stats.exit == WatchExit::Interrupted && process.state == RunState::Running {
            tracing::warn!(pid, "monitor interrupted; application left running and no longer synced");
        }

        self.enter(Phase::Done);
        Ok(RunSummary {
            pid,
            exit: stats.exit,
            last_state: process.state,
            polls: stats.polls,
            periodic_syncs: stats.periodic_syncs,
            terminal_sync_failures: report.failure_count(),
        })
    }

    async fn launch(&self) -> Result<u32, MonitorError> {
        let work_dir = self.config.work_dir.clone();
        match self.sync.pull(&work_dir).await {
            StepOutcome::Ok | StepOutcome::Skipped(_) => {}
            failed if self.config.abort_on_pull_failure => {
                return Err(MonitorError::Pull {
                    work_dir,
                    detail: describe(&failed),
                });
            }
            failed => {
                tracing::warn!(
                    detail = %describe(&failed),
                    "pull failed, continuing with local state"
                );
            }
        }

        let pid = launch_app(&self.config)?;
        tracing::info!(pid, app = %self.config.app_path, "application started");
        Ok(pid)
    }

    async fn watch(
        &self,
        process: &mut MonitoredProcess,
        shutdown: impl Future<Output = ()>,
    ) -> WatchStats {
        tokio::pin!(shutdown);
        let mut scheduler = SyncScheduler::new(self.config.sync_interval(), Instant::now());
        let mut polls = 0u64;
        let mut periodic_syncs = 0u32;

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break WatchExit::Interrupted,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let state = self.probe.probe(process.pid);
            polls += 1;
            process.observe(&state);

            let now = Instant::now();
            if scheduler.on_tick(now) {
                periodic_syncs += 1;
                let report = self.sync_cycle().await;
                log_report("periodic", &report);
            }

            match state {
                ProcessState::Alive => {
                    tracing::trace!(
                        pid = process.pid,
                        next_sync_secs = scheduler.time_until_due(now).map(|d| d.as_secs()),
                        "application alive"
                    );
                }
                ProcessState::Dead => {
                    tracing::info!(pid = process.pid, "application closed");
                    break WatchExit::Exited;
                }
                ProcessState::Indeterminate(err) => {
                    tracing::warn!(pid = process.pid, error = %err, "cannot determine application state");
                    break WatchExit::ProbeFailed(err);
                }
            }
        };

        WatchStats {
            exit,
            polls,
            periodic_syncs,
        }
    }

    async fn sync_cycle(&self) -> SyncReport {
        self.sync
            .sync(&self.config.work_dir, &self.config.commit_date_format)
            .await
    }
}

struct WatchStats {
    exit: WatchExit,
    polls: u64,
    periodic_syncs: u32,
}

fn describe(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Ok => "ok".to_string(),
        StepOutcome::Skipped(reason) => format!("skipped: {reason}"),
        StepOutcome::Failed(detail) => detail.clone(),
        StepOutcome::TimedOut(limit) => format!("timed out after {}s", limit.as_secs()),
    }
}

fn log_report(kind: &'static str, report: &SyncReport) {
    for (step, outcome) in &report.steps {
        tracing::debug!(kind, %step, outcome = %describe(outcome), "sync step");
    }
    let failures = report.failure_count();
    if failures == 0 {
        tracing::info!(kind, "sync finished");
    } else {
        tracing::warn!(kind, failures, "sync finished with failures");
    }
}
