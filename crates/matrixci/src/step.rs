//! Build steps and the per-combination build specification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One shell step of a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStep {
    /// Human-readable step name.
    pub name: String,

    /// Script body handed to the shell.
    pub script: String,

    /// A non-zero exit of this step does not fail the combination.
    #[serde(default)]
    pub ignore_failure: bool,
}

impl BuildStep {
    /// Create a step whose failure fails the combination.
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            ignore_failure: false,
        }
    }

    /// Mark this step as ignorable.
    pub fn ignorable(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    /// Whether the last non-empty line swallows its own failure with `|| true`.
    pub fn swallows_failure(&self) -> bool {
        self.script
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| line.ends_with("|| true") || line.ends_with("||true"))
            .unwrap_or(false)
    }
}

/// Ordered steps plus artifact glob patterns; immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BuildSpec {
    /// Steps in execution order.
    pub steps: Vec<BuildStep>,

    /// Glob patterns, relative to the working directory, of result artifacts.
    pub artifact_patterns: Vec<String>,
}

impl BuildSpec {
    pub fn new(steps: Vec<BuildStep>, artifact_patterns: Vec<String>) -> Self {
        Self {
            steps,
            artifact_patterns,
        }
    }

    /// Deterministic digest of the ordered steps and patterns.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(step.script.as_bytes());
            hasher.update(b"\0");
            hasher.update(if step.ignore_failure { b"1" } else { b"0" });
            hasher.update(b"\0");
        }
        hasher.update(b"--artifacts--");
        for pattern in &self.artifact_patterns {
            hasher.update(pattern.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}
