//! Result collection and build-level aggregation.
//!
//! The collector is the only state shared between concurrent runners.
//! Every `record` call is serialized behind one lock and persisted
//! immediately, so an interrupted build still leaves a per-combination
//! trail on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::report::{render_junit, BuildReport, BuildStatus, CombinationReport};
use crate::runner::{CollectionWarning, RunResult};
use crate::state::RunStatus;

/// File name of the consolidated JSON report.
pub const REPORT_FILE: &str = "report.json";
/// File name of the consolidated JUnit summary.
pub const JUNIT_FILE: &str = "matrix-junit.xml";
/// Per-combination captured output.
pub const OUTPUT_LOG_FILE: &str = "output.log";
/// Per-combination serialized result.
pub const RESULT_FILE: &str = "result.json";

/// SUCCEEDED only if there is at least one result and every result succeeded.
pub fn aggregate_status(results: &[RunResult]) -> BuildStatus {
    if !results.is_empty() && results.iter().all(|r| r.status == RunStatus::Succeeded) {
        BuildStatus::Succeeded
    } else {
        BuildStatus::Failed
    }
}

/// Identity and timing of the build being collected.
#[derive(Debug, Clone)]
pub struct BuildMeta {
    pub build_id: Uuid,
    pub spec_digest: String,
    pub expected: usize,
    pub started_at: DateTime<Utc>,
}

struct Recorded {
    result: RunResult,
    report: CombinationReport,
}

/// Gathers run results into one build report.
pub struct ResultCollector {
    output_dir: Option<PathBuf>,
    tail_lines: usize,
    recorded: Mutex<Vec<Recorded>>,
}

impl ResultCollector {
    /// `output_dir = None` keeps everything in memory.
    pub fn new(output_dir: Option<PathBuf>, tail_lines: usize) -> Self {
        Self {
            output_dir,
            tail_lines,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Record one finished combination.
    ///
    /// With an output directory, writes `<slug>/output.log`, `<slug>/result.json`
    /// and copies every artifact under `<slug>/`, keeping its path relative to
    /// the working directory. The result is kept even when writing fails; the
    /// write error is attached to its report as a warning and returned.
    pub async fn record(&self, result: RunResult) -> Result<()> {
        let mut recorded = self.recorded.lock().await;

        let slug = result.combination.slug();
        let mut warnings = result.warnings.clone();
        let (artifacts, persisted) = match &self.output_dir {
            Some(dir) => match self.persist(dir, &result).await {
                Ok(copies) => (copies, Ok(())),
                Err(e) => {
                    warn!(
                        combination = %result.combination.label(),
                        error = %e,
                        "failed to persist combination output"
                    );
                    warnings.push(CollectionWarning {
                        pattern: slug.clone(),
                        message: format!("output not persisted: {}", e),
                    });
                    (result.artifacts.clone(), Err(e))
                }
            },
            None => (result.artifacts.clone(), Ok(())),
        };

        debug!(
            combination = %result.combination.label(),
            status = %result.status,
            "recorded run result"
        );

        let report = CombinationReport {
            index: result.combination.index,
            label: result.combination.label(),
            id: result.combination.id.clone(),
            slug,
            status: result.status,
            failure: result.failure.as_ref().map(|f| f.to_string()),
            duration_ms: result.duration_ms,
            ignored_steps: result
                .steps
                .iter()
                .filter(|s| s.ignored)
                .map(|s| s.name.clone())
                .collect(),
            artifacts,
            warnings,
            output_tail: result.output_tail(self.tail_lines),
        };

        recorded.push(Recorded { result, report });
        persisted
    }

    async fn persist(&self, dir: &Path, result: &RunResult) -> Result<Vec<PathBuf>> {
        let combo_dir = dir.join(result.combination.slug());
        tokio::fs::create_dir_all(&combo_dir).await?;
        tokio::fs::write(combo_dir.join(OUTPUT_LOG_FILE), result.combined_output()).await?;
        tokio::fs::write(
            combo_dir.join(RESULT_FILE),
            serde_json::to_vec_pretty(result)?,
        )
        .await?;

        let mut copies = Vec::with_capacity(result.artifacts.len());
        for artifact in &result.artifacts {
            let relative = artifact
                .strip_prefix(&result.work_dir)
                .unwrap_or(artifact.as_path());
            let relative = match relative.file_name() {
                Some(_) if relative.is_relative() => relative.to_path_buf(),
                _ => continue,
            };
            let target = combo_dir.join(&relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::copy(artifact, &target).await {
                Ok(_) => copies.push(target),
                Err(e) => warn!(
                    artifact = %artifact.display(),
                    error = %e,
                    "failed to copy artifact"
                ),
            }
        }
        Ok(copies)
    }

    /// Snapshot of everything recorded so far, in arrival order.
    pub async fn results(&self) -> Vec<RunResult> {
        self.recorded
            .lock()
            .await
            .iter()
            .map(|r| r.result.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.recorded.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Build the final report and, with an output directory, write
    /// `report.json` and `matrix-junit.xml`.
    pub async fn finalize(&self, meta: &BuildMeta, cancelled: bool) -> Result<BuildReport> {
        let recorded = self.recorded.lock().await;

        let results: Vec<RunResult> = recorded.iter().map(|r| r.result.clone()).collect();
        let mut combinations: Vec<CombinationReport> =
            recorded.iter().map(|r| r.report.clone()).collect();
        combinations.sort_by_key(|c| c.index);

        let count = |status: RunStatus| results.iter().filter(|r| r.status == status).count();
        let status = if cancelled {
            BuildStatus::Cancelled
        } else if results.len() < meta.expected {
            BuildStatus::Failed
        } else {
            aggregate_status(&results)
        };

        let finished_at = Utc::now();
        let report = BuildReport {
            build_id: meta.build_id,
            spec_digest: meta.spec_digest.clone(),
            status,
            started_at: meta.started_at,
            finished_at,
            duration_ms: (finished_at - meta.started_at).num_milliseconds().max(0) as u64,
            expected: meta.expected,
            succeeded: count(RunStatus::Succeeded),
            failed: count(RunStatus::Failed),
            timed_out: count(RunStatus::TimedOut),
            errored: count(RunStatus::Error),
            combinations,
        };

        if let Some(dir) = &self.output_dir {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(REPORT_FILE), serde_json::to_vec_pretty(&report)?).await?;
            tokio::fs::write(dir.join(JUNIT_FILE), render_junit(&report)).await?;
        }

        Ok(report)
    }
}
