/// Git synchronization of the working tree: pull before launch, and
/// stage/status/commit/push cycles while the application runs and after it exits.
///
/// Every step is best-effort. Failures are logged and reported but never abort
/// the caller, and the remaining steps of a cycle are still attempted.
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// One git step of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Pull,
    Stage,
    Status,
    Commit,
    Publish,
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncStep::Pull => "pull",
            SyncStep::Stage => "stage",
            SyncStep::Status => "status",
            SyncStep::Commit => "commit",
            SyncStep::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Skipped(String),
    Failed(String),
    TimedOut(Duration),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_) | StepOutcome::TimedOut(_))
    }
}

/// Per-step results of one stage/status/commit/publish cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub steps: Vec<(SyncStep, StepOutcome)>,
}

impl SyncReport {
    pub fn record(&mut self, step: SyncStep, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    #[cfg(test)]
    pub fn outcome(&self, step: SyncStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    pub fn failure_count(&self) -> usize {
        self.steps.iter().filter(|(_, o)| o.is_failure()).count()
    }
}

/// A synchronization backend for a working directory.
pub trait SyncAction {
    /// Pull the latest remote state into `work_dir`.
    async fn pull(&self, work_dir: &Path) -> StepOutcome;

    /// Run one stage/status/commit/publish cycle, stamping the commit with the
    /// current local time formatted by `timestamp_format`.
    async fn sync(&self, work_dir: &Path, timestamp_format: &str) -> SyncReport;
}

/// `SyncAction` that shells out to the git CLI.
#[derive(Debug, Clone)]
pub struct GitSync {
    program: String,
    /// Arguments placed before `-C <dir>`, used to run a wrapper script in tests.
    leading_args: Vec<String>,
    commit_message: String,
    step_timeout: Duration,
}

impl GitSync {
    pub fn new(commit_message: impl Into<String>, step_timeout: Duration) -> Self {
        Self {
            program: "git".to_string(),
            leading_args: Vec::new(),
            commit_message: commit_message.into(),
            step_timeout,
        }
    }

    /// Use a different executable in place of `git`.
    #[cfg(test)]
    pub fn with_program(mut self, program: impl Into<String>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    fn commit_message(&self, timestamp_format: &str) -> String {
        let time = chrono::Local::now().format(timestamp_format).to_string();
        self.commit_message.replace("{time}", &time)
    }

    /// Run `git -C <work_dir> <args>` bounded by the step timeout.
    ///
    /// Returns the captured stdout on success.
    async fn run(&self, step: SyncStep, work_dir: &Path, args: &[&str]) -> Result<String, StepOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("-C")
            .arg(work_dir)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(%step, program = %self.program, ?args, "running git step");

        let output = match tokio::time::timeout(self.step_timeout, cmd.output()).await {
            Err(_) => {
                tracing::warn!(%step, timeout_secs = self.step_timeout.as_secs_f64(), "git step timed out");
                return Err(StepOutcome::TimedOut(self.step_timeout));
            }
            Ok(Err(e)) => {
                tracing::warn!(%step, error = %e, "failed to run git");
                return Err(StepOutcome::Failed(format!("failed to run {}: {e}", self.program)));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => format!("git {} exited with {}", args.first().unwrap_or(&""), output.status),
                msg => msg.to_string(),
            };
            tracing::warn!(%step, status = %output.status, detail = %detail, "git step failed");
            Err(StepOutcome::Failed(detail))
        }
    }

    async fn run_step(&self, step: SyncStep, work_dir: &Path, args: &[&str]) -> StepOutcome {
        match self.run(step, work_dir, args).await {
            Ok(_) => StepOutcome::Ok,
            Err(outcome) => outcome,
        }
    }
}

impl SyncAction for GitSync {
    async fn pull(&self, work_dir: &Path) -> StepOutcome {
        tracing::info!(work_dir = %work_dir.display(), "pulling most recent changes from remote");
        self.run_step(SyncStep::Pull, work_dir, &["pull"]).await
    }

    async fn sync(&self, work_dir: &Path, timestamp_format: &str) -> SyncReport {
        tracing::info!(work_dir = %work_dir.display(), "syncing changes to remote");
        let mut report = SyncReport::default();

        report.record(
            SyncStep::Stage,
            self.run_step(SyncStep::Stage, work_dir, &["add", "--all"]).await,
        );

        let clean = match self.run(SyncStep::Status, work_dir, &["status", "--porcelain"]).await {
            Ok(stdout) => {
                log_status(&stdout);
                report.record(SyncStep::Status, StepOutcome::Ok);
                stdout.trim().is_empty()
            }
            Err(outcome) => {
                report.record(SyncStep::Status, outcome);
                false
            }
        };

        let commit = if clean {
            StepOutcome::Skipped("nothing to commit".to_string())
        } else {
            let message = self.commit_message(timestamp_format);
            self.run_step(SyncStep::Commit, work_dir, &["commit", "-m", &message]).await
        };
        report.record(SyncStep::Commit, commit);

        report.record(
            SyncStep::Publish,
            self.run_step(SyncStep::Publish, work_dir, &["push"]).await,
        );

        report
    }
}

/// Surface `status --porcelain` lines so the user sees what a sync picks up.
fn log_status(porcelain: &str) -> usize {
    let mut changes = 0;
    for line in porcelain.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(change = %line, "working tree change");
        changes += 1;
    }
    if changes == 0 {
        tracing::info!("working tree clean");
    } else {
        tracing::info!(changes, "working tree status");
    }
    changes
}
