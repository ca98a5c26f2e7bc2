//! Per-combination execution: provision a workspace, run steps, collect artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::axis::MatrixCombination;
use crate::config::RunnerSettings;
use crate::error::Result;
use crate::obs;
use crate::process::{self, OutputCapture};
use crate::state::{CombinationState, Lifecycle, RunStatus};
use crate::step::{BuildSpec, BuildStep};

/// How long to keep draining pipes after a step's process has exited.
const PIPE_GRACE: Duration = Duration::from_secs(5);

/// Result of one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    /// Step name.
    pub name: String,

    /// Exit code (0 = success, -1 = could not spawn or killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// The step failed but was marked ignorable.
    pub ignored: bool,

    /// The step never ran because an earlier step halted the combination.
    pub skipped: bool,

    /// The step was killed when the combination's time budget ran out.
    pub timed_out: bool,
}

impl StepResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        !self.skipped && !self.timed_out && self.exit_code == 0
    }

    fn skipped(step: &BuildStep) -> Self {
        Self {
            name: step.name.clone(),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            ignored: false,
            skipped: true,
            timed_out: false,
        }
    }
}

/// Why a combination did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Environment setup failed before any step ran.
    Provisioning { message: String },
    /// A non-ignorable step exited non-zero.
    StepFailure { step: String, exit_code: i32 },
    /// The wall-clock budget ran out.
    Timeout { step: String, limit_secs: u64 },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Provisioning { message } => write!(f, "provisioning failed: {}", message),
            FailureReason::StepFailure { step, exit_code } => {
                write!(f, "step '{}' exited with code {}", step, exit_code)
            }
            FailureReason::Timeout { step, limit_secs } => {
                write!(f, "timed out after {}s during step '{}'", limit_secs, step)
            }
        }
    }
}

/// An artifact pattern that matched nothing (or could not be evaluated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionWarning {
    pub pattern: String,
    pub message: String,
}

/// Outcome of one combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub combination: MatrixCombination,
    pub status: RunStatus,
    pub failure: Option<FailureReason>,
    pub steps: Vec<StepResult>,
    /// Matched artifact files inside the working directory.
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<CollectionWarning>,
    pub work_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunResult {
    /// All captured output, step by step.
    pub fn combined_output(&self) -> String {
        let mut out = String::new();
        for step in self.steps.iter().filter(|s| !s.skipped) {
            out.push_str(&format!("==> {} (exit {})\n", step.name, step.exit_code));
            out.push_str(&step.stdout);
            if !step.stdout.is_empty() && !step.stdout.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&step.stderr);
            if !step.stderr.is_empty() && !step.stderr.ends_with('\n') {
                out.push('\n');
            }
        }
        if let Some(FailureReason::Provisioning { message }) = &self.failure {
            out.push_str(&format!("==> provisioning failed: {}\n", message));
        }
        out
    }

    /// Last `lines` lines of [`combined_output`](Self::combined_output).
    pub fn output_tail(&self, lines: usize) -> String {
        let combined = self.combined_output();
        let all: Vec<&str> = combined.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// What a runner hands back: a terminal result, or nothing because the build was cancelled.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished(RunResult),
    Cancelled { combination: MatrixCombination },
}

/// Execution options shared by every combination in a build.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Parent of the per-combination working directories.
    pub work_root: PathBuf,
    pub timeout: Option<Duration>,
    pub shell: Vec<String>,
    pub inherit_env: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl RunnerOptions {
    pub fn from_settings(settings: &RunnerSettings, work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            timeout: (settings.timeout_secs > 0)
                .then(|| Duration::from_secs(settings.timeout_secs)),
            shell: settings.shell.clone(),
            inherit_env: settings.inherit_env.clone(),
            env: settings.env.clone(),
        }
    }
}

enum StepEnd {
    Exited(StepResult),
    TimedOut(StepResult),
    Cancelled,
}

/// Runs the build for one combination at a time; share it freely across tasks.
#[derive(Debug, Clone)]
pub struct EnvironmentRunner {
    options: RunnerOptions,
}

impl EnvironmentRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Working directory owned by `combination`.
    pub fn work_dir_for(&self, combination: &MatrixCombination) -> PathBuf {
        self.options.work_root.join(combination.slug())
    }

    /// Environment for one run: inherited host variables, fixed settings, then matrix variables.
    pub fn environment_for(
        &self,
        combination: &MatrixCombination,
        work_dir: &Path,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for name in &self.options.inherit_env {
            if let Ok(value) = std::env::var(name) {
                env.insert(name.clone(), value);
            }
        }
        env.extend(self.options.env.clone());
        env.extend(combination.axis_env());
        env.insert("MATRIX_INDEX".to_string(), combination.index.to_string());
        env.insert("MATRIX_LABEL".to_string(), combination.label());
        env.insert("MATRIX_ID".to_string(), combination.id.clone());
        env.insert(
            "WORKSPACE".to_string(),
            work_dir.to_string_lossy().to_string(),
        );
        env
    }

    /// Run every step for `combination`.
    ///
    /// Returns [`RunOutcome::Cancelled`] if `cancel` flips while the
    /// combination is provisioning or running; its process groups are killed
    /// and no result is produced.
    pub async fn run(
        &self,
        combination: &MatrixCombination,
        build: &BuildSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        let label = combination.label();
        let mut lifecycle = Lifecycle::new(label.clone());
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = self
            .options
            .timeout
            .map(|t| tokio::time::Instant::from_std(start + t));

        if *cancel.borrow() {
            return RunOutcome::Cancelled {
                combination: combination.clone(),
            };
        }

        advance(&mut lifecycle, CombinationState::Provisioning);
        let work_dir = self.work_dir_for(combination);

        if let Err(e) = provision(&work_dir).await {
            warn!(combination = %label, error = %e, "provisioning failed");
            advance(&mut lifecycle, CombinationState::Error);
            return RunOutcome::Finished(self.finish(
                combination,
                RunStatus::Error,
                Some(FailureReason::Provisioning {
                    message: e.to_string(),
                }),
                build.steps.iter().map(StepResult::skipped).collect(),
                (Vec::new(), Vec::new()),
                work_dir,
                started_at,
                start,
            ));
        }
        let env = self.environment_for(combination, &work_dir);

        if *cancel.borrow() {
            return RunOutcome::Cancelled {
                combination: combination.clone(),
            };
        }
        advance(&mut lifecycle, CombinationState::Running);

        let mut steps = Vec::with_capacity(build.steps.len());
        let mut failure = None;
        let mut status = RunStatus::Succeeded;
        let mut groups = Vec::new();

        for step in &build.steps {
            if failure.is_some() {
                steps.push(StepResult::skipped(step));
                continue;
            }

            debug!(combination = %label, step = %step.name, "running step");
            match self
                .run_step(step, &work_dir, &env, deadline, &mut cancel, &mut groups)
                .await
            {
                StepEnd::Exited(mut result) => {
                    if result.exit_code != 0 {
                        if step.ignore_failure {
                            info!(
                                combination = %label,
                                step = %step.name,
                                exit_code = result.exit_code,
                                "ignorable step failed; continuing"
                            );
                            result.ignored = true;
                        } else {
                            status = RunStatus::Failed;
                            failure = Some(FailureReason::StepFailure {
                                step: step.name.clone(),
                                exit_code: result.exit_code,
                            });
                        }
                    }
                    steps.push(result);
                }
                StepEnd::TimedOut(result) => {
                    warn!(combination = %label, step = %step.name, "combination timed out");
                    groups.iter().copied().for_each(process::terminate_tree);
                    status = RunStatus::TimedOut;
                    failure = Some(FailureReason::Timeout {
                        step: step.name.clone(),
                        limit_secs: self.options.timeout.map(|t| t.as_secs()).unwrap_or(0),
                    });
                    steps.push(result);
                }
                StepEnd::Cancelled => {
                    groups.iter().copied().for_each(process::terminate_tree);
                    info!(combination = %label, "combination cancelled");
                    return RunOutcome::Cancelled {
                        combination: combination.clone(),
                    };
                }
            }
        }

        let collected = collect_artifacts(&work_dir, &build.artifact_patterns, &label);
        advance(&mut lifecycle, status.into());

        RunOutcome::Finished(self.finish(
            combination,
            status,
            failure,
            steps,
            collected,
            work_dir,
            started_at,
            start,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        combination: &MatrixCombination,
        status: RunStatus,
        failure: Option<FailureReason>,
        steps: Vec<StepResult>,
        (artifacts, warnings): (Vec<PathBuf>, Vec<CollectionWarning>),
        work_dir: PathBuf,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> RunResult {
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_combination_finished(
            &combination.label(),
            status.as_str(),
            duration_ms,
            artifacts.len(),
        );
        RunResult {
            combination: combination.clone(),
            status,
            failure,
            steps,
            artifacts,
            warnings,
            work_dir,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    async fn run_step(
        &self,
        step: &BuildStep,
        work_dir: &Path,
        env: &BTreeMap<String, String>,
        deadline: Option<tokio::time::Instant>,
        cancel: &mut watch::Receiver<bool>,
        groups: &mut Vec<u32>,
    ) -> StepEnd {
        let start = Instant::now();
        let shell = &self.options.shell;

        let mut cmd = Command::new(&shell[0]);
        cmd.args(&shell[1..])
            .arg(&step.script)
            .current_dir(work_dir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Spawn failures are step failures with exit code -1.
                warn!(step = %step.name, error = %e, "failed to spawn step");
                return StepEnd::Exited(StepResult {
                    name: step.name.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("failed to spawn '{}': {}", shell[0], e),
                    duration_ms: start.elapsed().as_millis() as u64,
                    ignored: false,
                    skipped: false,
                    timed_out: false,
                });
            }
        };
        let pgid = child.id();
        if let Some(pgid) = pgid {
            groups.push(pgid);
        }

        let stdout = OutputCapture::spawn(child.stdout.take());
        let stderr = OutputCapture::spawn(child.stderr.take());

        let expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        enum Waited {
            Exited(Option<i32>),
            Expired,
            Cancelled,
        }

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status.ok().and_then(|s| s.code())),
            _ = expiry => Waited::Expired,
            _ = process::cancelled(cancel) => Waited::Cancelled,
        };

        if !matches!(waited, Waited::Exited(_)) {
            if let Some(pgid) = pgid {
                process::terminate_tree(pgid);
            }
            let _ = child.kill().await;
        }

        let stdout = stdout.finish(PIPE_GRACE).await;
        let stderr = stderr.finish(PIPE_GRACE).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = |exit_code: i32, timed_out: bool| StepResult {
            name: step.name.clone(),
            exit_code,
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            duration_ms,
            ignored: false,
            skipped: false,
            timed_out,
        };

        match waited {
            Waited::Exited(code) => StepEnd::Exited(result(code.unwrap_or(-1), false)),
            Waited::Expired => StepEnd::TimedOut(result(-1, true)),
            Waited::Cancelled => StepEnd::Cancelled,
        }
    }
}

fn advance(lifecycle: &mut Lifecycle, next: CombinationState) {
    if let Err(e) = lifecycle.advance(next) {
        warn!(error = %e, "unexpected combination state transition");
    }
}

/// Create a fresh, empty working directory.
async fn provision(work_dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(work_dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(work_dir).await?;
    }
    tokio::fs::create_dir_all(work_dir).await?;
    Ok(())
}

/// Glob `patterns` relative to `work_dir`.
///
/// Patterns that match nothing produce a [`CollectionWarning`], never an error.
pub fn collect_artifacts(
    work_dir: &Path,
    patterns: &[String],
    label: &str,
) -> (Vec<PathBuf>, Vec<CollectionWarning>) {
    let mut found = BTreeSet::new();
    let mut warnings = Vec::new();
    let root = glob::Pattern::escape(&work_dir.to_string_lossy());

    for pattern in patterns {
        if Path::new(pattern).is_absolute() {
            warnings.push(CollectionWarning {
                pattern: pattern.clone(),
                message: "absolute patterns are not collected; use a path relative to the workspace"
                    .to_string(),
            });
            continue;
        }

        let full = format!("{}/{}", root, pattern);
        let matched: Vec<PathBuf> = match glob::glob(&full) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                warnings.push(CollectionWarning {
                    pattern: pattern.clone(),
                    message: format!("invalid pattern: {}", e),
                });
                continue;
            }
        };

        if matched.is_empty() {
            obs::emit_collection_warning(label, pattern);
            warnings.push(CollectionWarning {
                pattern: pattern.clone(),
                message: "pattern matched no files".to_string(),
            });
        }
        found.extend(matched);
    }

    (found.into_iter().collect(), warnings)
}
