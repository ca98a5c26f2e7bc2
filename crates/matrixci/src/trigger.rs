//! Schedule evaluation: decides whether an event starts a build.
//!
//! Schedules are pure predicates over events. The only state is the
//! last-seen marker per `(schedule, branch)`, held in a [`MarkerStore`],
//! which suppresses a second trigger for the same commit or time slot.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::axis::MatrixExpander;
use crate::error::{MatrixError, Result};
use crate::marker::MarkerStore;
use crate::obs;
use crate::step::BuildSpec;

/// Trigger condition of a schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every new commit on a matching branch.
    PerCommit,
    /// Once per UTC day, on the first tick at the configured hour.
    Nightly,
    /// Once per ISO week, on the configured weekday and hour.
    Weekly,
    /// Only on explicit manual requests.
    Adhoc,
}

/// Branch include/exclude lists. A trailing `*` makes an entry a prefix match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BranchFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl BranchFilter {
    /// Empty `include` admits every branch; `exclude` always wins.
    pub fn matches(&self, branch: &str) -> bool {
        if self.exclude.iter().any(|p| pattern_matches(p, branch)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| pattern_matches(p, branch))
    }
}

fn pattern_matches(pattern: &str, branch: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => branch.starts_with(prefix),
        None => pattern == branch,
    }
}

/// A named trigger condition with its branch filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    pub kind: ScheduleKind,
    pub branches: BranchFilter,
    /// UTC hour for `nightly` / `weekly`.
    pub hour: u32,
    /// Day for `weekly`.
    pub weekday: Weekday,
}

impl Schedule {
    pub fn new(name: impl Into<String>, kind: ScheduleKind, branches: BranchFilter) -> Self {
        Self {
            name: name.into(),
            kind,
            branches,
            hour: 0,
            weekday: Weekday::Sun,
        }
    }

    pub fn at_hour(mut self, hour: u32) -> Result<Self> {
        if hour > 23 {
            return Err(MatrixError::InvalidSchedule {
                name: self.name,
                reason: format!("hour {} out of range 0-23", hour),
            });
        }
        self.hour = hour;
        Ok(self)
    }

    pub fn on(mut self, weekday: Weekday) -> Self {
        self.weekday = weekday;
        self
    }

    /// Marker this event would fire under, or `None` if the event does not match.
    pub fn marker_for(&self, event: &TriggerEvent) -> Option<String> {
        if !self.branches.matches(event.branch()) {
            return None;
        }

        match (self.kind, event) {
            (ScheduleKind::PerCommit, TriggerEvent::Commit { sha, .. }) => Some(sha.clone()),
            (ScheduleKind::Nightly, TriggerEvent::Tick { at, .. }) if at.hour() == self.hour => {
                Some(at.date_naive().to_string())
            }
            (ScheduleKind::Weekly, TriggerEvent::Tick { at, .. })
                if at.weekday() == self.weekday && at.hour() == self.hour =>
            {
                let week = at.iso_week();
                Some(format!("{}-W{:02}", week.year(), week.week()))
            }
            (ScheduleKind::Adhoc, TriggerEvent::Manual { request_id, .. }) => {
                Some(request_id.clone())
            }
            _ => None,
        }
    }
}

/// Something that may start a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// A commit landed on `branch`.
    Commit { branch: String, sha: String },
    /// Wall-clock tick observed for `branch`.
    Tick { branch: String, at: DateTime<Utc> },
    /// Explicit request, identified so retries of the same request do not double-fire.
    Manual { branch: String, request_id: String },
}

impl TriggerEvent {
    pub fn branch(&self) -> &str {
        match self {
            TriggerEvent::Commit { branch, .. }
            | TriggerEvent::Tick { branch, .. }
            | TriggerEvent::Manual { branch, .. } => branch,
        }
    }
}

/// "Start build" signal carrying what to run.
#[derive(Debug, Clone)]
pub struct StartSignal {
    /// First schedule (in declaration order) that matched.
    pub schedule: String,
    pub branch: String,
    pub marker: String,
    pub expander: MatrixExpander,
    pub build: BuildSpec,
}

/// Evaluates events against the declared schedules.
pub struct ScheduleTrigger {
    schedules: Vec<Schedule>,
    expander: MatrixExpander,
    build: BuildSpec,
    store: Arc<dyn MarkerStore>,
}

impl ScheduleTrigger {
    pub fn new(
        schedules: Vec<Schedule>,
        expander: MatrixExpander,
        build: BuildSpec,
        store: Arc<dyn MarkerStore>,
    ) -> Self {
        Self {
            schedules,
            expander,
            build,
            store,
        }
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Evaluate one event.
    ///
    /// Every matching schedule whose stored marker differs records the new
    /// marker; at most one signal is emitted per event. Markers are written
    /// in one batch before the signal is built, so a failed write yields an
    /// error and the same event fires again on the next evaluation.
    pub async fn evaluate(&self, event: &TriggerEvent) -> Result<Option<StartSignal>> {
        let branch = event.branch();
        let mut fresh: Vec<(String, String)> = Vec::new();

        for schedule in &self.schedules {
            let Some(marker) = schedule.marker_for(event) else {
                continue;
            };

            let last = self.store.last_marker(&schedule.name, branch).await?;
            if last.as_deref() == Some(marker.as_str()) {
                debug!(schedule = %schedule.name, branch = %branch, marker = %marker, "marker already seen");
                continue;
            }
            fresh.push((schedule.name.clone(), marker));
        }

        let Some((schedule, marker)) = fresh.first().cloned() else {
            return Ok(None);
        };
        self.store.record_markers(branch, &fresh).await?;

        obs::emit_trigger_fired(&schedule, branch, &marker);
        Ok(Some(StartSignal {
            schedule,
            branch: branch.to_string(),
            marker,
            expander: self.expander.clone(),
            build: self.build.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::marker::MemoryMarkerStore;
    use crate::step::BuildStep;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn include(branches: &[&str]) -> BranchFilter {
        BranchFilter {
            include: branches.iter().map(|b| b.to_string()).collect(),
            exclude: vec![],
        }
    }

    fn commit(branch: &str, sha: &str) -> TriggerEvent {
        TriggerEvent::Commit {
            branch: branch.to_string(),
            sha: sha.to_string(),
        }
    }

    fn trigger(schedules: Vec<Schedule>) -> ScheduleTrigger {
        trigger_with(schedules, Arc::new(MemoryMarkerStore::new()))
    }

    fn trigger_with(schedules: Vec<Schedule>, store: Arc<dyn MarkerStore>) -> ScheduleTrigger {
        let expander = MatrixExpander::new(
            vec![Axis::new("python", vec!["2.7".to_string()])],
            vec!["ubuntu/trusty64".to_string()],
        )
        .unwrap();
        let build = BuildSpec::new(vec![BuildStep::new("test", "true")], vec![]);
        ScheduleTrigger::new(schedules, expander, build, store)
    }

    /// Rejects writes for one schedule until `fail` is cleared.
    struct FlakyStore {
        inner: MemoryMarkerStore,
        failing_schedule: String,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl MarkerStore for FlakyStore {
        async fn last_marker(&self, schedule: &str, branch: &str) -> Result<Option<String>> {
            self.inner.last_marker(schedule, branch).await
        }

        async fn record_marker(&self, schedule: &str, branch: &str, marker: &str) -> Result<()> {
            if schedule == self.failing_schedule && self.fail.load(Ordering::SeqCst) {
                return Err(MatrixError::MarkerStore("disk full".to_string()));
            }
            self.inner.record_marker(schedule, branch, marker).await
        }
    }

    #[test]
    fn test_branch_filter() {
        let filter = BranchFilter {
            include: vec!["master".to_string(), "release/*".to_string()],
            exclude: vec!["release/old".to_string()],
        };
        assert!(filter.matches("master"));
        assert!(filter.matches("release/1.0"));
        assert!(!filter.matches("release/old"));
        assert!(!filter.matches("feature/x"));
        assert!(BranchFilter::default().matches("anything"));
    }

    #[test]
    fn test_per_commit_marker() {
        let schedule = Schedule::new("commit_master", ScheduleKind::PerCommit, include(&["master"]));
        assert_eq!(schedule.marker_for(&commit("master", "abc")), Some("abc".to_string()));
        assert_eq!(schedule.marker_for(&commit("dev", "abc")), None);
    }

    #[test]
    fn test_nightly_marker_is_the_date() {
        let schedule = Schedule::new("nightly", ScheduleKind::Nightly, BranchFilter::default())
            .at_hour(2)
            .unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 2, 30, 0).unwrap();
        let event = TriggerEvent::Tick {
            branch: "master".to_string(),
            at,
        };
        assert_eq!(schedule.marker_for(&event), Some("2026-10-17".to_string()));

        let off_hour = TriggerEvent::Tick {
            branch: "master".to_string(),
            at: Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap(),
        };
        assert_eq!(schedule.marker_for(&off_hour), None);
        assert_eq!(schedule.marker_for(&commit("master", "abc")), None);
    }

    #[test]
    fn test_weekly_marker_is_iso_week() {
        let schedule = Schedule::new("weekly", ScheduleKind::Weekly, BranchFilter::default())
            .on(Weekday::Sat);
        // 2026-10-17 is a Saturday.
        let event = TriggerEvent::Tick {
            branch: "master".to_string(),
            at: Utc.with_ymd_and_hms(2026, 10, 17, 0, 5, 0).unwrap(),
        };
        assert_eq!(schedule.marker_for(&event), Some("2026-W42".to_string()));
    }

    #[test]
    fn test_hour_out_of_range() {
        let err = Schedule::new("n", ScheduleKind::Nightly, BranchFilter::default())
            .at_hour(24)
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_same_commit_fires_once() {
        let trigger = trigger(vec![Schedule::new(
            "commit_master",
            ScheduleKind::PerCommit,
            include(&["master"]),
        )]);

        let first = trigger.evaluate(&commit("master", "abc")).await.unwrap();
        assert!(first.is_some());
        let signal = first.unwrap();
        assert_eq!(signal.schedule, "commit_master");
        assert_eq!(signal.marker, "abc");
        assert_eq!(signal.expander.len(), 1);

        assert!(trigger.evaluate(&commit("master", "abc")).await.unwrap().is_none());
        assert!(trigger.evaluate(&commit("master", "def")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unmatched_branch_does_not_fire() {
        let trigger = trigger(vec![Schedule::new(
            "commit_master",
            ScheduleKind::PerCommit,
            include(&["master"]),
        )]);
        assert!(trigger.evaluate(&commit("feature", "abc")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_signal_for_multiple_matches() {
        let trigger = trigger(vec![
            Schedule::new("a", ScheduleKind::PerCommit, BranchFilter::default()),
            Schedule::new("b", ScheduleKind::PerCommit, include(&["master"])),
        ]);

        let signal = trigger.evaluate(&commit("master", "abc")).await.unwrap().unwrap();
        assert_eq!(signal.schedule, "a");
        // Both markers were recorded, so neither schedule fires again.
        assert!(trigger.evaluate(&commit("master", "abc")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_marker_write_does_not_lose_the_event() {
        let store = Arc::new(FlakyStore {
            inner: MemoryMarkerStore::new(),
            failing_schedule: "b".to_string(),
            fail: AtomicBool::new(true),
        });
        let trigger = trigger_with(
            vec![
                Schedule::new("a", ScheduleKind::PerCommit, BranchFilter::default()),
                Schedule::new("b", ScheduleKind::PerCommit, BranchFilter::default()),
            ],
            store.clone(),
        );

        assert!(trigger.evaluate(&commit("master", "abc")).await.is_err());
        assert_eq!(store.last_marker("b", "master").await.unwrap(), None);

        store.fail.store(false, Ordering::SeqCst);
        let signal = trigger
            .evaluate(&commit("master", "abc"))
            .await
            .unwrap()
            .expect("event should fire once the store recovers");
        assert_eq!(signal.marker, "abc");
        assert!(trigger.evaluate(&commit("master", "abc")).await.unwrap().is_none());
    }
}
