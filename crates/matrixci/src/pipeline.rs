//! Build orchestration: expand, run combinations in a bounded pool, collect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::axis::MatrixExpander;
use crate::collector::{BuildMeta, ResultCollector};
use crate::config::{MatrixConfig, RunnerSettings};
use crate::error::{MatrixError, Result};
use crate::obs;
use crate::report::BuildReport;
use crate::runner::{EnvironmentRunner, RunOutcome, RunnerOptions};
use crate::step::BuildSpec;

/// Cancellation flag shared by every runner of one build.
#[derive(Debug, Clone)]
pub struct BuildCancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl BuildCancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for BuildCancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Where and how a build runs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Parent of the per-combination working directories.
    pub work_root: PathBuf,
    /// Report and artifact destination; `None` keeps results in memory.
    pub output_dir: Option<PathBuf>,
    /// Keep `<work_root>/<build_id>` after the build. Without an output
    /// directory it is always kept, since it holds the only copy of the
    /// artifacts.
    pub keep_work_dirs: bool,
    pub settings: RunnerSettings,
}

impl PipelineOptions {
    pub fn new(work_root: impl Into<PathBuf>, settings: RunnerSettings) -> Self {
        Self {
            work_root: work_root.into(),
            output_dir: None,
            keep_work_dirs: false,
            settings,
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_keep_work_dirs(mut self, keep: bool) -> Self {
        self.keep_work_dirs = keep;
        self
    }
}

/// Matrix build orchestrator.
pub struct MatrixPipeline;

impl MatrixPipeline {
    /// Run the build described by a loaded config.
    pub async fn run_config(
        config: &MatrixConfig,
        options: PipelineOptions,
        cancel: &BuildCancellation,
    ) -> Result<BuildReport> {
        let expander = config.expander()?;
        Self::run(&expander, &config.build, options, cancel).await
    }

    /// Expand the matrix and run every combination.
    ///
    /// At most `settings.concurrency` combinations run at once. Per-combination
    /// failures never abort siblings. After cancellation no new combination
    /// starts, in-flight ones are killed, and their partial results are
    /// discarded; the report then has status CANCELLED.
    pub async fn run(
        expander: &MatrixExpander,
        build: &BuildSpec,
        options: PipelineOptions,
        cancel: &BuildCancellation,
    ) -> Result<BuildReport> {
        let concurrency = options.settings.concurrency;
        if concurrency == 0 {
            return Err(MatrixError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let build_id = Uuid::new_v4();
        let build_id_str = build_id.to_string();
        let combinations = expander.expand();
        let meta = BuildMeta {
            build_id,
            spec_digest: build.digest(),
            expected: combinations.len(),
            started_at: Utc::now(),
        };

        let span = obs::build_span(&build_id_str);
        obs::emit_build_started(&build_id_str, combinations.len(), concurrency);

        let build_root = options.work_root.join(&build_id_str);
        let runner = Arc::new(EnvironmentRunner::new(RunnerOptions::from_settings(
            &options.settings,
            build_root.clone(),
        )));
        let collector = Arc::new(ResultCollector::new(
            options.output_dir.clone(),
            options.settings.output_tail_lines,
        ));
        let build = Arc::new(build.clone());
        let sem = Arc::new(Semaphore::new(concurrency));

        let mut tasks = Vec::with_capacity(combinations.len());
        for combination in combinations {
            let runner = Arc::clone(&runner);
            let collector = Arc::clone(&collector);
            let build = Arc::clone(&build);
            let sem = Arc::clone(&sem);
            let cancel_rx = cancel.subscribe();

            let task = async move {
                let _permit = sem.acquire_owned().await.ok();

                // Cancelled while queued: never start.
                if *cancel_rx.borrow() {
                    return Ok(());
                }

                match runner.run(&combination, &build, cancel_rx).await {
                    RunOutcome::Finished(result) => collector.record(result).await,
                    RunOutcome::Cancelled { combination } => {
                        info!(combination = %combination.label(), "discarding cancelled combination");
                        Ok(())
                    }
                }
            };
            tasks.push(tokio::spawn(task.instrument(span.clone())));
        }

        for joined in join_all(tasks).instrument(span).await {
            match joined {
                Ok(Ok(())) => {}
                // The collector kept the result; only its files are missing.
                Ok(Err(e)) => warn!(error = %e, "combination output incomplete"),
                Err(e) => warn!(error = %e, "combination task panicked"),
            }
        }

        let report = collector.finalize(&meta, cancel.is_cancelled()).await?;
        if options.output_dir.is_some() && !options.keep_work_dirs {
            remove_build_root(&build_root).await;
        }
        obs::emit_build_finished(
            &build_id_str,
            report.status.as_str(),
            start.elapsed().as_millis() as u64,
            report.recorded(),
        );
        Ok(report)
    }
}

async fn remove_build_root(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "removed build workspace"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove build workspace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::report::BuildStatus;
    use crate::state::RunStatus;
    use crate::step::BuildStep;
    use std::time::Duration;

    fn expander(values: &[&str]) -> MatrixExpander {
        MatrixExpander::new(
            vec![Axis::new(
                "python",
                values.iter().map(|v| v.to_string()).collect(),
            )],
            vec!["ubuntu/trusty64".to_string()],
        )
        .unwrap()
    }

    fn settings(concurrency: usize) -> RunnerSettings {
        RunnerSettings {
            concurrency,
            ..RunnerSettings::default()
        }
    }

    #[test]
    fn test_cancellation_flag() {
        let cancel = BuildCancellation::new();
        let rx = cancel.subscribe();
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_runs_every_combination() {
        let dir = tempfile::tempdir().unwrap();
        let build = BuildSpec::new(
            vec![BuildStep::new("version", "echo $PYTHON_VERSION")],
            vec![],
        );

        let report = MatrixPipeline::run(
            &expander(&["2.7", "3.4", "3.5"]),
            &build,
            PipelineOptions::new(dir.path(), settings(2)),
            &BuildCancellation::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, BuildStatus::Succeeded);
        assert_eq!(report.expected, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.spec_digest, build.digest());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let build = BuildSpec::new(
            vec![BuildStep::new(
                "tests",
                "test \"$PYTHON_VERSION\" != 2.7",
            )],
            vec![],
        );

        let report = MatrixPipeline::run(
            &expander(&["2.7", "3.4"]),
            &build,
            PipelineOptions::new(dir.path(), settings(1)),
            &BuildCancellation::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, BuildStatus::Failed);
        assert_eq!(report.recorded(), 2);
        assert_eq!(report.combinations[0].status, RunStatus::Failed);
        assert_eq!(report.combinations[1].status, RunStatus::Succeeded);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = BuildCancellation::new();
        cancel.cancel();
        let build = BuildSpec::new(vec![BuildStep::new("touch", "touch ran")], vec![]);

        let report = MatrixPipeline::run(
            &expander(&["2.7", "3.4"]),
            &build,
            PipelineOptions::new(dir.path(), settings(2)),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(report.status, BuildStatus::Cancelled);
        assert_eq!(report.recorded(), 0);
        assert_eq!(report.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("active");
        std::fs::create_dir_all(&marker).unwrap();
        // Each run registers itself, records how many peers it sees, then leaves.
        let script = format!(
            "touch {m}/$MATRIX_INDEX; sleep 0.3; ls {m} | wc -l > peers; rm {m}/$MATRIX_INDEX",
            m = marker.display()
        );
        let build = BuildSpec::new(vec![BuildStep::new("peers", script)], vec![]);
        let options = PipelineOptions::new(dir.path().join("work"), settings(2));

        let report = tokio::time::timeout(
            Duration::from_secs(30),
            MatrixPipeline::run(
                &expander(&["a", "b", "c", "d"]),
                &build,
                options,
                &BuildCancellation::new(),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report.succeeded, 4);

        let work = dir.path().join("work").join(report.build_id.to_string());
        for combo in &report.combinations {
            let peers = std::fs::read_to_string(work.join(&combo.slug).join("peers")).unwrap();
            assert!(peers.trim().parse::<usize>().unwrap() <= 2);
        }
    }

    #[tokio::test]
    async fn test_workspace_removed_once_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let build = BuildSpec::new(vec![BuildStep::new("x", "echo built > built.txt")], vec![]);
        let run = |keep: bool| {
            let options = PipelineOptions::new(dir.path().join("work"), settings(1))
                .with_output_dir(dir.path().join("out"))
                .with_keep_work_dirs(keep);
            let build = build.clone();
            async move {
                MatrixPipeline::run(
                    &expander(&["2.7"]),
                    &build,
                    options,
                    &BuildCancellation::new(),
                )
                .await
                .unwrap()
            }
        };

        let removed = run(false).await;
        assert_eq!(removed.status, BuildStatus::Succeeded);
        assert!(!dir
            .path()
            .join("work")
            .join(removed.build_id.to_string())
            .exists());
        assert!(dir
            .path()
            .join("out")
            .join(&removed.combinations[0].slug)
            .join(crate::collector::OUTPUT_LOG_FILE)
            .exists());

        let kept = run(true).await;
        assert!(dir
            .path()
            .join("work")
            .join(kept.build_id.to_string())
            .join(&kept.combinations[0].slug)
            .join("built.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let build = BuildSpec::new(vec![BuildStep::new("x", "true")], vec![]);
        let err = MatrixPipeline::run(
            &expander(&["2.7"]),
            &build,
            PipelineOptions::new(dir.path(), settings(0)),
            &BuildCancellation::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_config_error());
    }
}
