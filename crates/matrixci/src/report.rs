//! Build report model and renderers (JUnit XML, plain text).

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runner::CollectionWarning;
use crate::state::RunStatus;

/// Exit code when every combination succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when a combination failed or timed out and none errored.
pub const EXIT_FAILED: i32 = 1;
/// Exit code when at least one combination hit an infrastructure error.
pub const EXIT_INFRA_ERROR: i32 = 3;
/// Exit code for configuration errors (sysexits `EX_CONFIG`).
pub const EXIT_CONFIG_ERROR: i32 = 78;
/// Exit code for a cancelled build.
pub const EXIT_CANCELLED: i32 = 130;

/// Aggregate status of a whole build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Succeeded => "SUCCEEDED",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Cancelled => "CANCELLED",
        }
    }
}

/// One combination's line in the build report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombinationReport {
    pub index: usize,
    pub label: String,
    pub id: String,
    pub slug: String,
    pub status: RunStatus,
    pub failure: Option<String>,
    pub duration_ms: u64,
    /// Steps whose failure was tolerated.
    pub ignored_steps: Vec<String>,
    /// Artifact copies under the output directory (or in-place paths when no output directory is set).
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<CollectionWarning>,
    pub output_tail: String,
}

/// Consolidated result of a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub spec_digest: String,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Combinations the matrix expanded to.
    pub expected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    /// Recorded combinations, sorted by expansion index.
    pub combinations: Vec<CombinationReport>,
}

impl BuildReport {
    pub fn recorded(&self) -> usize {
        self.combinations.len()
    }

    /// Process exit code for this report. ERROR outranks FAILED.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            BuildStatus::Succeeded => EXIT_SUCCESS,
            BuildStatus::Cancelled => EXIT_CANCELLED,
            BuildStatus::Failed if self.errored > 0 => EXIT_INFRA_ERROR,
            BuildStatus::Failed => EXIT_FAILED,
        }
    }
}

/// Render a JUnit XML document with one testcase per combination.
pub fn render_junit(report: &BuildReport) -> String {
    let mut xml = String::new();
    let time = report.duration_ms as f64 / 1000.0;
    let failures = report.failed + report.timed_out;

    let _ = writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        xml,
        r#"<testsuites name="matrixci" tests="{}" failures="{}" errors="{}" time="{:.3}">"#,
        report.recorded(),
        failures,
        report.errored,
        time
    );
    let _ = writeln!(
        xml,
        r#"  <testsuite name="build-{}" tests="{}" failures="{}" errors="{}" skipped="{}" time="{:.3}" timestamp="{}">"#,
        report.build_id,
        report.recorded(),
        failures,
        report.errored,
        report.expected.saturating_sub(report.recorded()),
        time,
        report.started_at.format("%Y-%m-%dT%H:%M:%S")
    );

    for combo in &report.combinations {
        let _ = writeln!(
            xml,
            r#"    <testcase name="{}" classname="matrix" time="{:.3}">"#,
            escape_xml(&combo.label),
            combo.duration_ms as f64 / 1000.0
        );
        let message = escape_xml(combo.failure.as_deref().unwrap_or(""));
        let tail = escape_xml(&combo.output_tail);
        match combo.status {
            RunStatus::Succeeded => {}
            RunStatus::Failed => {
                let _ = writeln!(
                    xml,
                    r#"      <failure type="step_failure" message="{}">{}</failure>"#,
                    message, tail
                );
            }
            RunStatus::TimedOut => {
                let _ = writeln!(
                    xml,
                    r#"      <failure type="timeout" message="{}">{}</failure>"#,
                    message, tail
                );
            }
            RunStatus::Error => {
                let _ = writeln!(
                    xml,
                    r#"      <error type="provisioning" message="{}">{}</error>"#,
                    message, tail
                );
            }
        }
        let _ = writeln!(xml, "    </testcase>");
    }

    let _ = writeln!(xml, "  </testsuite>");
    let _ = writeln!(xml, "</testsuites>");
    xml
}

/// Render a short human-readable summary.
pub fn render_text(report: &BuildReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Build: {}", report.build_id);
    let _ = writeln!(out, "Status: {}", report.status.as_str());
    let _ = writeln!(out, "Duration: {}ms", report.duration_ms);
    let _ = writeln!(out);

    for combo in &report.combinations {
        let mark = if combo.status == RunStatus::Succeeded {
            "✓"
        } else {
            "✗"
        };
        let _ = writeln!(
            out,
            "  {} [{}] {} ({}ms, {} artifact(s))",
            mark,
            combo.status,
            combo.label,
            combo.duration_ms,
            combo.artifacts.len()
        );
        if let Some(failure) = &combo.failure {
            let _ = writeln!(out, "      {}", failure);
        }
        for step in &combo.ignored_steps {
            let _ = writeln!(out, "      tolerated failure in step '{}'", step);
        }
        for warning in &combo.warnings {
            let _ = writeln!(out, "      warning: '{}' {}", warning.pattern, warning.message);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Summary: {}/{} succeeded, {} failed, {} timed out, {} errored",
        report.succeeded,
        report.expected,
        report.failed,
        report.timed_out,
        report.errored
    );
    if report.recorded() < report.expected {
        let _ = writeln!(
            out,
            "Incomplete: {} combination(s) produced no result",
            report.expected - report.recorded()
        );
    }
    out
}

/// Escape XML special characters
/// Escapes markup and replaces characters XML 1.0 cannot carry at all
/// (C0 controls other than tab, newline and carriage return, U+FFFE, U+FFFF)
/// with U+FFFD.
fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c < '\u{20}' || c == '\u{FFFE}' || c == '\u{FFFF}' => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
    out
}
