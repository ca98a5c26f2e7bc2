//! matrixci - matrix-driven CI test orchestration CLI
//!
//! ## Commands
//!
//! - `expand`: List the combinations a config expands to
//! - `run`: Run the whole matrix once and write the report
//! - `trigger`: Evaluate one event against the schedules and run if it fires
//! - `watch`: Poll a git branch and run builds as schedules fire

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use matrixci::report::{render_text, EXIT_CANCELLED, EXIT_CONFIG_ERROR, EXIT_INFRA_ERROR};
use matrixci::{
    BuildCancellation, BuildReport, BuildSpec, FsMarkerStore, MatrixConfig, MatrixError,
    MatrixExpander, MatrixPipeline, PipelineOptions, ScheduleTrigger, StartSignal, TriggerEvent,
};

#[derive(Parser)]
#[command(name = "matrixci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run one build across a matrix of versions and operating systems", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the combinations a config expands to
    Expand {
        /// Matrix config file (YAML)
        #[arg(short, long, default_value = "matrix.yml")]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Run every combination once
    Run {
        /// Matrix config file (YAML)
        #[arg(short, long, default_value = "matrix.yml")]
        config: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Evaluate one event against the declared schedules; run the build if it fires
    Trigger {
        /// Matrix config file (YAML)
        #[arg(short, long, default_value = "matrix.yml")]
        config: PathBuf,

        /// Kind of event
        #[arg(long, value_enum)]
        event: EventArg,

        /// Branch the event applies to
        #[arg(short, long)]
        branch: String,

        /// Commit SHA (commit events)
        #[arg(long)]
        sha: Option<String>,

        /// Request identifier (manual events)
        #[arg(long)]
        request_id: Option<String>,

        /// Tick time in RFC 3339 (tick events; default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Marker store file
        #[arg(long, default_value = ".matrixci/markers.json")]
        markers: PathBuf,

        /// Record the marker and report, but do not run the build
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Poll a git branch and run builds whenever a schedule fires
    Watch {
        /// Matrix config file (YAML)
        #[arg(short, long, default_value = "matrix.yml")]
        config: PathBuf,

        /// Git repository to poll
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Branch to watch
        #[arg(short, long, default_value = "master")]
        branch: String,

        /// Fetch from this remote before each poll and watch `<remote>/<branch>`
        #[arg(long)]
        remote: Option<String>,

        /// Seconds between polls
        #[arg(long, default_value = "60")]
        interval: u64,

        /// Marker store file
        #[arg(long, default_value = ".matrixci/markers.json")]
        markers: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },
}

#[derive(Args, Clone, Debug)]
struct BuildArgs {
    /// Parent directory for per-combination working directories
    #[arg(long, default_value = ".matrixci/work")]
    work_dir: PathBuf,

    /// Directory for reports, logs and collected artifacts
    #[arg(short, long, default_value = ".matrixci/out")]
    output: PathBuf,

    /// Maximum combinations running at once (overrides the config)
    #[arg(long, env = "MATRIXCI_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Per-combination timeout in seconds, 0 for none (overrides the config)
    #[arg(long, env = "MATRIXCI_TIMEOUT")]
    timeout: Option<u64>,

    /// Keep per-combination working directories after the report is written
    #[arg(long)]
    keep_work_dirs: bool,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EventArg {
    Commit,
    Tick,
    Manual,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    matrixci::telemetry::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Expand { config, format } => cmd_expand(&config, format),
        Commands::Run { config, build } => cmd_run(&config, &build).await,
        Commands::Trigger {
            config,
            event,
            branch,
            sha,
            request_id,
            at,
            markers,
            dry_run,
            build,
        } => match build_event(event, branch, sha, request_id, at) {
            Ok(event) => cmd_trigger(&config, event, &markers, dry_run, &build).await,
            Err(e) => Err(e),
        },
        Commands::Watch {
            config,
            repo,
            branch,
            remote,
            interval,
            markers,
            build,
        } => {
            cmd_watch(
                &config,
                &repo,
                &branch,
                remote.as_deref(),
                Duration::from_secs(interval.max(1)),
                &markers,
                &build,
            )
            .await
        }
    };

    match outcome {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(error_exit_code(&e) as u8)
        }
    }
}

/// Configuration problems exit 78; anything else that stops a build is infrastructure.
fn error_exit_code(err: &anyhow::Error) -> i32 {
    let config = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<MatrixError>())
        .any(MatrixError::is_config_error);
    if config {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_INFRA_ERROR
    }
}

fn load_config(path: &Path, args: Option<&BuildArgs>) -> Result<MatrixConfig> {
    let mut config = MatrixConfig::load(path)
        .with_context(|| format!("Failed to load matrix config {}", path.display()))?;
    if let Some(args) = args {
        if let Some(concurrency) = args.concurrency {
            if concurrency == 0 {
                return Err(MatrixError::InvalidConfig(
                    "--concurrency must be at least 1".to_string(),
                )
                .into());
            }
            config.runner.concurrency = concurrency;
        }
        if let Some(timeout) = args.timeout {
            config.runner.timeout_secs = timeout;
        }
    }
    Ok(config)
}

fn build_event(
    kind: EventArg,
    branch: String,
    sha: Option<String>,
    request_id: Option<String>,
    at: Option<DateTime<Utc>>,
) -> Result<TriggerEvent> {
    let missing =
        |flag: &str| MatrixError::InvalidConfig(format!("{} is required for this event", flag));
    Ok(match kind {
        EventArg::Commit => TriggerEvent::Commit {
            branch,
            sha: sha.ok_or_else(|| missing("--sha"))?,
        },
        EventArg::Tick => TriggerEvent::Tick {
            branch,
            at: at.unwrap_or_else(Utc::now),
        },
        EventArg::Manual => TriggerEvent::Manual {
            branch,
            request_id: request_id.ok_or_else(|| missing("--request-id"))?,
        },
    })
}

/// List the combinations a config expands to
fn cmd_expand(config_path: &Path, format: Format) -> Result<i32> {
    let config = load_config(config_path, None)?;
    let combinations = config.expander()?.expand();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&combinations)?),
        Format::Text => {
            println!("{} combination(s):", combinations.len());
            for combo in &combinations {
                println!("  [{:03}] {} {}", combo.index, combo.short_id(), combo.label());
            }
        }
    }
    Ok(0)
}

/// Run every combination once
async fn cmd_run(config_path: &Path, args: &BuildArgs) -> Result<i32> {
    let config = load_config(config_path, Some(args))?;
    let expander = config.expander()?;
    let options = PipelineOptions::new(&args.work_dir, config.runner.clone())
        .with_output_dir(&args.output)
        .with_keep_work_dirs(args.keep_work_dirs);

    println!(
        "Running {} combination(s) from {}",
        expander.len(),
        config_path.display()
    );

    let cancel = BuildCancellation::new();
    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let report = MatrixPipeline::run(&expander, &config.build, options, &cancel)
        .await
        .context("Matrix build failed to run")?;
    ctrl_c.abort();

    print_report(&report, args.format)?;
    Ok(report.exit_code())
}

/// Evaluate one event; run the build if a schedule fires
async fn cmd_trigger(
    config_path: &Path,
    event: TriggerEvent,
    markers: &Path,
    dry_run: bool,
    args: &BuildArgs,
) -> Result<i32> {
    let config = load_config(config_path, Some(args))?;
    let trigger = open_trigger(&config, markers)?;

    let Some(signal) = trigger.evaluate(&event).await? else {
        println!("No schedule fired for branch '{}'", event.branch());
        return Ok(0);
    };

    println!(
        "Schedule '{}' fired for branch '{}' at {}",
        signal.schedule, signal.branch, signal.marker
    );
    if dry_run {
        return Ok(0);
    }

    let cancel = BuildCancellation::new();
    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let report = run_signal(&signal, &config, args, &cancel).await?;
    ctrl_c.abort();

    print_report(&report, args.format)?;
    Ok(report.exit_code())
}

/// What started a watched build.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildOrigin {
    branch: String,
    commit: bool,
}

impl BuildOrigin {
    fn of(event: &TriggerEvent) -> Self {
        Self {
            branch: event.branch().to_string(),
            commit: matches!(event, TriggerEvent::Commit { .. }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchAction {
    /// Nothing in flight.
    Start,
    /// Cancel the running build and start this one.
    Supersede,
    /// Run after the running build finishes.
    Queue,
}

/// Only a newer commit on the branch of a running commit build cancels it.
fn watch_action(running: Option<&BuildOrigin>, incoming: &BuildOrigin) -> WatchAction {
    match running {
        None => WatchAction::Start,
        Some(running)
            if running.commit && incoming.commit && running.branch == incoming.branch =>
        {
            WatchAction::Supersede
        }
        Some(_) => WatchAction::Queue,
    }
}

struct InFlight {
    origin: BuildOrigin,
    marker: String,
    cancel: BuildCancellation,
    handle: JoinHandle<matrixci::Result<BuildReport>>,
}

/// Poll a branch and run builds as schedules fire.
///
/// A newer commit supersedes a commit build in flight; every other signal
/// waits for the running build. A queued commit replaces an older queued
/// commit for the same branch.
async fn cmd_watch(
    config_path: &Path,
    repo: &Path,
    branch: &str,
    remote: Option<&str>,
    interval: Duration,
    markers: &Path,
    args: &BuildArgs,
) -> Result<i32> {
    let config = load_config(config_path, Some(args))?;
    let trigger = open_trigger(&config, markers)?;
    let mut in_flight: Option<InFlight> = None;
    let mut queued: VecDeque<(BuildOrigin, StartSignal)> = VecDeque::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(repo = %repo.display(), branch = %branch, "watching for builds");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Some(build) = in_flight.take() {
                    build.cancel.cancel();
                    finish_build(build, args.format).await;
                }
                if !queued.is_empty() {
                    warn!(dropped = queued.len(), "interrupt received; dropping queued builds");
                }
                return Ok(EXIT_CANCELLED);
            }
            _ = ticker.tick() => {}
        }

        if in_flight.as_ref().is_some_and(|b| b.handle.is_finished()) {
            if let Some(build) = in_flight.take() {
                finish_build(build, args.format).await;
            }
        }
        if in_flight.is_none() {
            if let Some((origin, signal)) = queued.pop_front() {
                in_flight = Some(start_build(&signal, origin, &config, args));
            }
        }

        let sha = match head_sha(repo, branch, remote).await {
            Ok(sha) => sha,
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(error = %reason, "failed to read branch head");
                continue;
            }
        };

        let events = [
            TriggerEvent::Commit {
                branch: branch.to_string(),
                sha,
            },
            TriggerEvent::Tick {
                branch: branch.to_string(),
                at: Utc::now(),
            },
        ];

        for event in &events {
            let Some(signal) = trigger.evaluate(event).await? else {
                continue;
            };
            let origin = BuildOrigin::of(event);

            match watch_action(in_flight.as_ref().map(|b| &b.origin), &origin) {
                WatchAction::Start => {}
                WatchAction::Supersede => {
                    if let Some(build) = in_flight.take() {
                        info!(
                            superseded = %build.marker,
                            by = %signal.marker,
                            "cancelling superseded build"
                        );
                        build.cancel.cancel();
                        finish_build(build, args.format).await;
                    }
                }
                WatchAction::Queue => {
                    if origin.commit {
                        queued.retain(|(o, _)| !(o.commit && o.branch == origin.branch));
                    }
                    info!(
                        schedule = %signal.schedule,
                        marker = %signal.marker,
                        "build in flight; queueing"
                    );
                    queued.push_back((origin, signal));
                    continue;
                }
            }

            in_flight = Some(start_build(&signal, origin, &config, args));
        }
    }
}

fn start_build(
    signal: &StartSignal,
    origin: BuildOrigin,
    config: &MatrixConfig,
    args: &BuildArgs,
) -> InFlight {
    let cancel = BuildCancellation::new();
    let options = build_options(signal, config, args);
    let expander: MatrixExpander = signal.expander.clone();
    let build: BuildSpec = signal.build.clone();
    let task_cancel = cancel.clone();
    println!(
        "Schedule '{}' fired for branch '{}' at {}",
        signal.schedule, signal.branch, signal.marker
    );
    InFlight {
        origin,
        marker: signal.marker.clone(),
        cancel,
        handle: tokio::spawn(async move {
            MatrixPipeline::run(&expander, &build, options, &task_cancel).await
        }),
    }
}

async fn finish_build(build: InFlight, format: Format) {
    match build.handle.await {
        Ok(Ok(report)) => {
            if let Err(e) = print_report(&report, format) {
                warn!(error = %e, "failed to print report");
            }
        }
        Ok(Err(e)) => warn!(marker = %build.marker, error = %e, "build failed to run"),
        Err(e) => warn!(marker = %build.marker, error = %e, "build task panicked"),
    }
}

fn open_trigger(config: &MatrixConfig, markers: &Path) -> Result<ScheduleTrigger> {
    let store = FsMarkerStore::open(markers)
        .with_context(|| format!("Failed to open marker store {}", markers.display()))?;
    Ok(ScheduleTrigger::new(
        config.schedules.clone(),
        config.expander()?,
        config.build.clone(),
        Arc::new(store),
    ))
}

/// Output goes under `<output>/<schedule>/<marker>` so successive builds do not collide.
fn build_options(signal: &StartSignal, config: &MatrixConfig, args: &BuildArgs) -> PipelineOptions {
    let marker: String = signal
        .marker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    PipelineOptions::new(&args.work_dir, config.runner.clone())
        .with_output_dir(args.output.join(&signal.schedule).join(marker))
        .with_keep_work_dirs(args.keep_work_dirs)
}

async fn run_signal(
    signal: &StartSignal,
    config: &MatrixConfig,
    args: &BuildArgs,
    cancel: &BuildCancellation,
) -> Result<BuildReport> {
    MatrixPipeline::run(
        &signal.expander,
        &signal.build,
        build_options(signal, config, args),
        cancel,
    )
    .await
    .context("Matrix build failed to run")
}

fn cancel_on_ctrl_c(cancel: BuildCancellation) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling build");
            cancel.cancel();
        }
    })
}

/// Current commit of `branch` (or `<remote>/<branch>` after fetching).
async fn head_sha(repo: &Path, branch: &str, remote: Option<&str>) -> Result<String> {
    let reference = match remote {
        Some(remote) => {
            let status = tokio::process::Command::new("git")
                .arg("-C")
                .arg(repo)
                .args(["fetch", "--quiet", remote, branch])
                .status()
                .await
                .context("failed to run git fetch")?;
            if !status.success() {
                anyhow::bail!("git fetch {} {} failed with {}", remote, branch, status);
            }
            format!("{}/{}", remote, branch)
        }
        None => branch.to_string(),
    };

    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{}^{{commit}}", reference))
        .output()
        .await
        .context("failed to run git rev-parse")?;
    if !output.status.success() {
        anyhow::bail!("cannot resolve '{}' in {}", reference, repo.display());
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        anyhow::bail!("git rev-parse returned empty output for '{}'", reference);
    }
    Ok(sha)
}

fn print_report(report: &BuildReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Format::Text => print!("{}", render_text(report)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixci::report::{EXIT_FAILED, EXIT_SUCCESS};

    const CONFIG: &str = r#"
schedules:
  commit:
    schedule: per_commit
python: ["2.7", "3.4"]
os: [ubuntu/trusty64]
build:
  - name: tests
    script: test "$PYTHON_VERSION" != "$FAIL_ON"
runner:
  env:
    FAIL_ON: none
"#;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("matrix.yml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn build_args(dir: &Path) -> BuildArgs {
        BuildArgs {
            work_dir: dir.join("work"),
            output: dir.join("out"),
            concurrency: None,
            timeout: None,
            keep_work_dirs: false,
            format: Format::Text,
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "matrixci",
            "--json",
            "run",
            "--config",
            "ci/matrix.yml",
            "--concurrency",
            "4",
            "--format",
            "json",
            "--keep-work-dirs",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { config, build } => {
                assert_eq!(config, PathBuf::from("ci/matrix.yml"));
                assert_eq!(build.concurrency, Some(4));
                assert_eq!(build.format, Format::Json);
                assert!(build.keep_work_dirs);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_commit_event_requires_sha() {
        let err =
            build_event(EventArg::Commit, "master".to_string(), None, None, None).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG_ERROR);

        let event = build_event(
            EventArg::Commit,
            "master".to_string(),
            Some("abc".to_string()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(event.branch(), "master");
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.yml"), None).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG_ERROR);
        assert_ne!(error_exit_code(&anyhow::anyhow!("disk full")), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_invalid_config_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "build:\n  - script: \"true\"\n");
        let err = cmd_expand(&path, Format::Text).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_flag_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let mut args = build_args(dir.path());
        args.concurrency = Some(5);
        args.timeout = Some(0);
        let config = load_config(&path, Some(&args)).unwrap();
        assert_eq!(config.runner.concurrency, 5);
        assert_eq!(config.runner.timeout_secs, 0);

        args.concurrency = Some(0);
        let err = load_config(&path, Some(&args)).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_run_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let code = cmd_run(&path, &build_args(dir.path())).await.unwrap();
        assert_eq!(code, EXIT_SUCCESS);
        assert!(dir.path().join("out").join("report.json").exists());

        let failing = write_config(
            dir.path(),
            &CONFIG.replace("FAIL_ON: none", "FAIL_ON: \"2.7\""),
        );
        let code = cmd_run(&failing, &build_args(dir.path())).await.unwrap();
        assert_eq!(code, EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_trigger_fires_once_per_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let markers = dir.path().join("markers.json");
        let commit = || TriggerEvent::Commit {
            branch: "master".to_string(),
            sha: "abc123".to_string(),
        };

        let code = cmd_trigger(&path, commit(), &markers, false, &build_args(dir.path()))
            .await
            .unwrap();
        assert_eq!(code, EXIT_SUCCESS);
        assert!(dir
            .path()
            .join("out")
            .join("commit")
            .join("abc123")
            .join("report.json")
            .exists());

        // Same commit again: nothing fires, nothing fails.
        let code = cmd_trigger(&path, commit(), &markers, true, &build_args(dir.path()))
            .await
            .unwrap();
        assert_eq!(code, EXIT_SUCCESS);
        assert!(markers.exists());
    }

    #[tokio::test]
    async fn test_head_sha_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(head_sha(dir.path(), "master", None).await.is_err());
    }

    #[test]
    fn test_watch_only_newer_commit_supersedes() {
        let commit = |branch: &str| {
            BuildOrigin::of(&TriggerEvent::Commit {
                branch: branch.to_string(),
                sha: "abc123".to_string(),
            })
        };
        let tick = BuildOrigin::of(&TriggerEvent::Tick {
            branch: "master".to_string(),
            at: Utc::now(),
        });
        let manual = BuildOrigin::of(&TriggerEvent::Manual {
            branch: "master".to_string(),
            request_id: "req-1".to_string(),
        });

        assert_eq!(watch_action(None, &tick), WatchAction::Start);
        assert_eq!(watch_action(None, &commit("master")), WatchAction::Start);
        assert_eq!(
            watch_action(Some(&commit("master")), &commit("master")),
            WatchAction::Supersede
        );
        // A nightly slot or manual request never cancels a running commit build.
        assert_eq!(watch_action(Some(&commit("master")), &tick), WatchAction::Queue);
        assert_eq!(watch_action(Some(&commit("master")), &manual), WatchAction::Queue);
        // Nor does a commit cancel a scheduled build.
        assert_eq!(watch_action(Some(&tick), &commit("master")), WatchAction::Queue);
        assert_eq!(
            watch_action(Some(&commit("release/3.1")), &commit("master")),
            WatchAction::Queue
        );
    }
}
