//! matrixci - matrix-driven CI test orchestration
//!
//! Runs one build specification across the Cartesian product of declared
//! version axes and operating systems:
//! - Expands axes into deterministic, uniquely identified combinations
//! - Runs each combination's steps in an isolated working directory and
//!   environment, with a bounded worker pool, timeouts and cancellation
//! - Collects artifacts and aggregates per-combination results into one report
//! - Decides from commits, clock ticks and manual requests when a build starts

pub mod axis;
pub mod collector;
pub mod config;
pub mod error;
pub mod marker;
pub mod obs;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod runner;
pub mod state;
pub mod step;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use axis::{Axis, MatrixCombination, MatrixExpander};
pub use collector::{aggregate_status, BuildMeta, ResultCollector};
pub use config::{MatrixConfig, RunnerSettings};
pub use error::{MatrixError, Result};
pub use marker::{FsMarkerStore, MarkerStore, MemoryMarkerStore};
pub use pipeline::{BuildCancellation, MatrixPipeline, PipelineOptions};
pub use report::{BuildReport, BuildStatus, CombinationReport};
pub use runner::{EnvironmentRunner, FailureReason, RunOutcome, RunResult, RunnerOptions};
pub use state::{CombinationState, RunStatus};
pub use step::{BuildSpec, BuildStep};
pub use trigger::{BranchFilter, Schedule, ScheduleKind, ScheduleTrigger, StartSignal, TriggerEvent};
