//! Structured lifecycle events for builds and combinations.
//!
//! Every helper logs with a stable `event` field so JSON log consumers can
//! filter on it.

use tracing::{info, warn};

use crate::state::CombinationState;

/// Span covering one build; attach with `tracing::Instrument`.
pub fn build_span(build_id: &str) -> tracing::Span {
    tracing::info_span!("matrixci.build", build_id = %build_id)
}

pub fn emit_build_started(build_id: &str, combinations: usize, concurrency: usize) {
    info!(
        event = "build.started",
        build_id = %build_id,
        combinations = combinations,
        concurrency = concurrency,
    );
}

pub fn emit_build_finished(build_id: &str, status: &str, duration_ms: u64, recorded: usize) {
    info!(
        event = "build.finished",
        build_id = %build_id,
        status = %status,
        duration_ms = duration_ms,
        recorded = recorded,
    );
}

pub fn emit_state_changed(label: &str, from: CombinationState, to: CombinationState) {
    info!(
        event = "combination.state",
        combination = %label,
        from = %from,
        to = %to,
    );
}

pub fn emit_combination_finished(label: &str, status: &str, duration_ms: u64, artifacts: usize) {
    info!(
        event = "combination.finished",
        combination = %label,
        status = %status,
        duration_ms = duration_ms,
        artifacts = artifacts,
    );
}

pub fn emit_collection_warning(label: &str, pattern: &str) {
    warn!(
        event = "collection.warning",
        combination = %label,
        pattern = %pattern,
        "artifact pattern matched no files"
    );
}

pub fn emit_trigger_fired(schedule: &str, branch: &str, marker: &str) {
    info!(
        event = "trigger.fired",
        schedule = %schedule,
        branch = %branch,
        marker = %marker,
    );
}
