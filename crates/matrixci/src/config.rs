//! YAML build-matrix configuration.
//!
//! ```yaml
//! schedules:
//!   commit_master:
//!     schedule: per_commit
//!     branches:
//!       include: [master]
//! python:
//!   - 2.7
//!   - 3.4
//! os:
//!   - ubuntu/trusty64
//! cassandra:
//!   - dse-5.0
//!   - dse-5.1
//! build:
//!   - script: |
//!       pip install -r test-requirements.txt
//!       nosetests -s -v --with-xunit tests/integration/
//!     ignore_failure: true
//!   - xunit:
//!     - "*_results.xml"
//! ```
//!
//! Reserved top-level keys are `schedules`, `os`, `build` and `runner`.
//! Every other top-level key is an axis, in declaration order.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::axis::{Axis, MatrixExpander, OS_AXIS};
use crate::error::{MatrixError, Result};
use crate::step::{BuildSpec, BuildStep};
use crate::trigger::{BranchFilter, Schedule, ScheduleKind};

const SCHEDULES_KEY: &str = "schedules";
const BUILD_KEY: &str = "build";
const RUNNER_KEY: &str = "runner";

/// Host variables copied into every run unless overridden.
pub const DEFAULT_INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR", "USER"];

/// Execution knobs shared by every combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    /// Maximum combinations running at once.
    pub concurrency: usize,

    /// Wall-clock budget per combination in seconds (0 = unlimited).
    pub timeout_secs: u64,

    /// Shell argv prefix; the step body is appended as the last argument.
    pub shell: Vec<String>,

    /// Host environment variables copied into each run.
    pub inherit_env: Vec<String>,

    /// Fixed variables set for every run.
    pub env: BTreeMap<String, String>,

    /// Lines of output kept in reports per combination.
    pub output_tail_lines: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout_secs: 3600,
            shell: vec!["sh".to_string(), "-e".to_string(), "-c".to_string()],
            inherit_env: DEFAULT_INHERITED_ENV.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            output_tail_lines: 50,
        }
    }
}

impl RunnerSettings {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MatrixError::InvalidConfig(
                "runner.concurrency must be at least 1".to_string(),
            ));
        }
        if self.shell.is_empty() {
            return Err(MatrixError::InvalidConfig(
                "runner.shell must name an executable".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchedule {
    schedule: ScheduleKind,
    #[serde(default)]
    branches: BranchFilter,
    hour: Option<u32>,
    weekday: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    name: Option<String>,
    script: Option<String>,
    xunit: Option<Vec<String>>,
    #[serde(default)]
    ignore_failure: bool,
}

/// Fully validated matrix configuration.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub schedules: Vec<Schedule>,
    pub axes: Vec<Axis>,
    pub os: Vec<String>,
    pub build: BuildSpec,
    pub runner: RunnerSettings,
}

impl MatrixConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MatrixError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loading matrix config");
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        let root = match root {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                return Err(MatrixError::InvalidConfig(
                    "top level must be a mapping".to_string(),
                ))
            }
        };

        let mut schedules = Vec::new();
        let mut axes = Vec::new();
        let mut os = None;
        let mut build = None;
        let mut runner = RunnerSettings::default();

        for (key, value) in root {
            let key = match key {
                Value::String(s) => s,
                other => {
                    return Err(MatrixError::InvalidConfig(format!(
                        "top-level keys must be strings, found {:?}",
                        other
                    )))
                }
            };

            match key.as_str() {
                SCHEDULES_KEY => schedules = parse_schedules(value)?,
                BUILD_KEY => build = Some(parse_build(value)?),
                RUNNER_KEY => runner = serde_yaml::from_value(value)?,
                OS_AXIS => os = Some(parse_axis_values(OS_AXIS, value)?),
                _ => {
                    let values = parse_axis_values(&key, value)?;
                    axes.push(Axis::new(key, values));
                }
            }
        }

        let build = build
            .ok_or_else(|| MatrixError::InvalidConfig("missing 'build' section".to_string()))?;
        runner.validate()?;

        let config = Self {
            schedules,
            axes,
            os: os.unwrap_or_else(|| vec![std::env::consts::OS.to_string()]),
            build,
            runner,
        };

        // Surface expansion errors (no axes, empty axis) at load time.
        config.expander()?;
        Ok(config)
    }

    /// Expander over the declared axes and OS list.
    pub fn expander(&self) -> Result<MatrixExpander> {
        MatrixExpander::new(self.axes.clone(), self.os.clone())
    }
}

fn parse_axis_values(axis: &str, value: Value) -> Result<Vec<String>> {
    let items = match value {
        Value::Sequence(items) => items,
        _ => {
            return Err(MatrixError::InvalidConfig(format!(
                "axis '{}' must be a list of version identifiers",
                axis
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(MatrixError::InvalidConfig(format!(
                "axis '{}' has a non-scalar value: {:?}",
                axis, other
            ))),
        })
        .collect()
}

fn parse_schedules(value: Value) -> Result<Vec<Schedule>> {
    let map = match value {
        Value::Mapping(map) => map,
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(MatrixError::InvalidConfig(
                "'schedules' must map names to schedule definitions".to_string(),
            ))
        }
    };

    let mut schedules = Vec::with_capacity(map.len());
    for (name, body) in map {
        let name = match name {
            Value::String(s) => s,
            other => {
                return Err(MatrixError::InvalidConfig(format!(
                    "schedule names must be strings, found {:?}",
                    other
                )))
            }
        };
        let raw: RawSchedule =
            serde_yaml::from_value(body).map_err(|e| MatrixError::InvalidSchedule {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let mut schedule = Schedule::new(name.clone(), raw.schedule, raw.branches);
        if let Some(hour) = raw.hour {
            schedule = schedule.at_hour(hour)?;
        }
        if let Some(day) = raw.weekday {
            let weekday: Weekday = day.parse().map_err(|_| MatrixError::InvalidSchedule {
                name: name.clone(),
                reason: format!("unknown weekday '{}'", day),
            })?;
            schedule = schedule.on(weekday);
        }
        schedules.push(schedule);
    }
    Ok(schedules)
}

fn parse_build(value: Value) -> Result<BuildSpec> {
    let items = match value {
        Value::Sequence(items) => items,
        _ => {
            return Err(MatrixError::InvalidConfig(
                "'build' must be a list of steps".to_string(),
            ))
        }
    };

    let mut steps = Vec::new();
    let mut patterns = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let raw: RawStep = serde_yaml::from_value(item).map_err(|e| MatrixError::InvalidStep {
            index,
            reason: e.to_string(),
        })?;

        match (raw.script, raw.xunit) {
            (Some(script), None) => {
                let name = raw
                    .name
                    .unwrap_or_else(|| format!("step-{}", steps.len() + 1));
                let step = BuildStep {
                    name,
                    script,
                    ignore_failure: raw.ignore_failure,
                };
                if step.swallows_failure() && !step.ignore_failure {
                    warn!(
                        step = %step.name,
                        "step ends with '|| true'; prefer 'ignore_failure: true' so tolerated failures stay visible"
                    );
                }
                steps.push(step);
            }
            (None, Some(globs)) => {
                if raw.name.is_some() || raw.ignore_failure {
                    return Err(MatrixError::InvalidStep {
                        index,
                        reason: "'xunit' entries take no 'name' or 'ignore_failure'".to_string(),
                    });
                }
                patterns.extend(globs);
            }
            (Some(_), Some(_)) => {
                return Err(MatrixError::InvalidStep {
                    index,
                    reason: "a step declares either 'script' or 'xunit', not both".to_string(),
                })
            }
            (None, None) => {
                return Err(MatrixError::InvalidStep {
                    index,
                    reason: "a step must declare 'script' or 'xunit'".to_string(),
                })
            }
        }
    }

    if steps.is_empty() {
        return Err(MatrixError::InvalidConfig(
            "'build' declares no script steps".to_string(),
        ));
    }

    Ok(BuildSpec::new(steps, patterns))
}
