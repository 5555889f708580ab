use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use serde::{Serialize, Serializer};

use crate::runs::events::{RunEvent, RunOutcome, StepStatus};

/// Overall status of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Cancelled)
    }
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Passed => Self::Passed,
            RunOutcome::Failed => Self::Failed,
            RunOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Live state of one step within a run attempt.
///
/// Created on `step_started`, mutated in place by the matching
/// `step_completed`. A completion with no prior start is tolerated and
/// treated as both start and finish.
#[derive(Debug, Clone, Serialize)]
pub struct StepState {
    pub step_number: u32,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture_name: Option<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub retried: bool,
}

/// Folded view of one run attempt.
///
/// A retry never mutates a prior snapshot; it retires it and starts a new
/// one linked through `original_run_id`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<i64>,
    pub total_steps: u32,
    #[serde(serialize_with = "steps_in_order")]
    steps: BTreeMap<u32, StepState>,
    pub retry_attempt: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_run_id: Option<String>,
    pub pass_count: u32,
    pub error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Steps serialize as a sequence in ascending `step_number` order.
fn steps_in_order<S>(steps: &BTreeMap<u32, StepState>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(steps.values())
}

impl RunSnapshot {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            test_case_id: None,
            total_steps: 0,
            steps: BTreeMap::new(),
            retry_attempt: 0,
            max_retries: 0,
            original_run_id: None,
            pass_count: 0,
            error_count: 0,
            summary: None,
        }
    }

    /// Steps in ascending `step_number` order, regardless of event arrival
    /// order.
    pub fn steps(&self) -> impl Iterator<Item = &StepState> {
        self.steps.values()
    }

    pub fn step(&self, step_number: u32) -> Option<&StepState> {
        self.steps.get(&step_number)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Recomputed from scratch so step status corrections stay consistent.
    fn recompute_counters(&mut self) {
        self.pass_count = 0;
        self.error_count = 0;
        for step in self.steps.values() {
            match step.status {
                StepStatus::Passed => self.pass_count += 1,
                StepStatus::Failed | StepStatus::Skipped => self.error_count += 1,
                StepStatus::Running => {}
            }
        }
    }
}

/// Diagnostic notice surfaced from `error`/`warning` events. Never changes
/// run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    Error(String),
    Warning(String),
}

/// Signal that the backend scheduled a retry; the next attempt arrives on a
/// fresh exchange opened by the orchestrating caller.
#[derive(Debug, Clone, Serialize)]
pub struct RetryNotice {
    pub original_run_id: String,
    pub retry_attempt: u32,
    pub reason: String,
}

/// Folds a decoded event sequence into run snapshots.
///
/// Owns the current attempt and every retired one in the retry chain.
/// Events must be applied in arrival order; all updates are synchronous.
#[derive(Debug, Default)]
pub struct RunStateMachine {
    current: Option<RunSnapshot>,
    retired: Vec<RunSnapshot>,
    notices: Vec<Notice>,
    retry_notice: Option<RetryNotice>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&RunSnapshot> {
        self.current.as_ref()
    }

    /// Attempts superseded by a retry, oldest first.
    pub fn retired(&self) -> &[RunSnapshot] {
        &self.retired
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Pending retry signal, cleared when the next attempt starts.
    pub fn retry_notice(&self) -> Option<&RetryNotice> {
        self.retry_notice.as_ref()
    }

    pub fn take_retry_notice(&mut self) -> Option<RetryNotice> {
        self.retry_notice.take()
    }

    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id,
                test_case_id,
                total_steps,
                retry_attempt,
                max_retries,
                original_run_id,
            } => {
                // A new attempt retires the live snapshot instead of
                // mutating it; the chain stays linked via original_run_id.
                if let Some(previous) = self.current.take() {
                    self.retired.push(previous);
                }
                self.retry_notice = None;

                let mut snapshot = RunSnapshot::new(run_id.clone());
                snapshot.status = RunStatus::Running;
                snapshot.test_case_id = *test_case_id;
                snapshot.total_steps = *total_steps;
                snapshot.retry_attempt = *retry_attempt;
                snapshot.max_retries = *max_retries;
                snapshot.original_run_id = original_run_id.clone();
                self.current = Some(snapshot);
            }

            RunEvent::StepStarted {
                step_number,
                action,
                target,
                value,
                fixture_name,
                ..
            } => {
                let snapshot = self.ensure_current();
                snapshot
                    .steps
                    .entry(*step_number)
                    .and_modify(|step| {
                        // Duplicate or out-of-order start: refresh the
                        // descriptive fields, keep whatever status we had.
                        step.action = action.clone();
                        step.target = target.clone();
                        step.value = value.clone();
                        step.fixture_name = fixture_name.clone();
                    })
                    .or_insert_with(|| StepState {
                        step_number: *step_number,
                        action: action.clone(),
                        target: target.clone(),
                        value: value.clone(),
                        fixture_name: fixture_name.clone(),
                        status: StepStatus::Running,
                        duration_ms: None,
                        error: None,
                        screenshot: None,
                        retried: false,
                    });
            }

            RunEvent::StepCompleted {
                step_number,
                action,
                status,
                duration_ms,
                error,
                screenshot,
                target,
                value,
                fixture_name,
                retried,
            } => {
                let snapshot = self.ensure_current();
                let step = snapshot
                    .steps
                    .entry(*step_number)
                    .or_insert_with(|| StepState {
                        step_number: *step_number,
                        action: action.clone(),
                        target: target.clone(),
                        value: value.clone(),
                        fixture_name: fixture_name.clone(),
                        status: *status,
                        duration_ms: None,
                        error: None,
                        screenshot: None,
                        retried: false,
                    });
                step.status = *status;
                step.duration_ms = Some(*duration_ms);
                step.error = error.clone();
                step.screenshot = screenshot.clone();
                if let Some(retried) = retried {
                    step.retried = *retried;
                }
                snapshot.recompute_counters();
            }

            RunEvent::RunCompleted {
                status,
                pass_count,
                error_count,
                summary,
                ..
            } => {
                let snapshot = self.ensure_current();
                snapshot.status = RunStatus::from(*status);
                snapshot.pass_count = *pass_count;
                snapshot.error_count = *error_count;
                snapshot.summary = Some(summary.clone());
            }

            RunEvent::RetryScheduled {
                original_run_id,
                retry_attempt,
                reason,
            } => {
                self.retry_notice = Some(RetryNotice {
                    original_run_id: original_run_id.clone(),
                    retry_attempt: *retry_attempt,
                    reason: reason.clone(),
                });
            }

            RunEvent::Error { message } => {
                self.notices.push(Notice::Error(message.clone()));
            }

            RunEvent::Warning { message } => {
                self.notices.push(Notice::Warning(message.clone()));
            }

            RunEvent::Unrecognized => {}
        }
    }

    /// Close the current attempt after its stream ended.
    ///
    /// A stream that never delivered `run_completed` ended abnormally; the
    /// attempt must not stay open and must not read as passed.
    pub fn finish(&mut self) {
        if let Some(snapshot) = self.current.as_mut() {
            if !snapshot.status.is_terminal() {
                snapshot.status = RunStatus::Failed;
                snapshot.summary = Some("stream ended before run completion".to_string());
            }
        }
    }

    /// Whole retry chain, oldest attempt first.
    pub fn into_chain(mut self) -> Vec<RunSnapshot> {
        if let Some(current) = self.current.take() {
            self.retired.push(current);
        }
        self.retired
    }

    /// Drive a full event stream to its final snapshot.
    pub async fn fold<S>(events: S) -> Self
    where
        S: Stream<Item = RunEvent>,
    {
        let mut machine = Self::new();
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            machine.apply(&event);
        }
        machine.finish();
        machine
    }

    fn ensure_current(&mut self) -> &mut RunSnapshot {
        // Defensive: a backend bug could report steps before run_started.
        self.current.get_or_insert_with(|| {
            let mut snapshot = RunSnapshot::new(String::new());
            snapshot.status = RunStatus::Running;
            snapshot
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::events::{RunEvent, RunOutcome, StepStatus};

    fn started(run_id: &str, retry_attempt: u32, original: Option<&str>) -> RunEvent {
        RunEvent::RunStarted {
            run_id: run_id.to_string(),
            test_case_id: Some(7),
            total_steps: 2,
            retry_attempt,
            max_retries: 2,
            original_run_id: original.map(str::to_string),
        }
    }

    fn step_started(n: u32, action: &str) -> RunEvent {
        RunEvent::StepStarted {
            step_number: n,
            action: action.to_string(),
            target: None,
            value: None,
            description: None,
            fixture_name: None,
        }
    }

    fn step_completed(n: u32, status: StepStatus) -> RunEvent {
        RunEvent::StepCompleted {
            step_number: n,
            action: "click".to_string(),
            status,
            duration_ms: 40,
            error: None,
            screenshot: None,
            target: None,
            value: None,
            fixture_name: None,
            retried: None,
        }
    }

    fn completed(run_id: &str, status: RunOutcome, pass: u32, err: u32) -> RunEvent {
        RunEvent::RunCompleted {
            run_id: run_id.to_string(),
            status,
            pass_count: pass,
            error_count: err,
            summary: "done".to_string(),
            retry_attempt: 0,
            max_retries: 2,
        }
    }

    #[test]
    fn test_fold_happy_path() {
        let events = vec![
            started("r-1", 0, None),
            step_started(1, "goto"),
            step_completed(1, StepStatus::Passed),
            completed("r-1", RunOutcome::Passed, 1, 0),
        ];

        let machine = tokio_test::block_on(RunStateMachine::fold(tokio_stream::iter(events)));
        let snapshot = machine.current().unwrap();

        assert_eq!(snapshot.status, RunStatus::Passed);
        assert_eq!(snapshot.step_count(), 1);
        assert_eq!(snapshot.step(1).unwrap().status, StepStatus::Passed);
        assert_eq!(snapshot.pass_count, 1);
        assert_eq!(snapshot.error_count, 0);
    }

    #[test]
    fn test_incomplete_stream_is_not_passed() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_started(1, "goto"));
        machine.finish();

        let snapshot = machine.current().unwrap();
        assert_eq!(snapshot.status, RunStatus::Failed);
        assert!(snapshot.summary.as_deref().unwrap().contains("before run completion"));
    }

    #[test]
    fn test_completion_without_start_creates_step() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(3, StepStatus::Failed));

        let snapshot = machine.current().unwrap();
        let step = snapshot.step(3).unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.duration_ms, Some(40));
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_duplicate_step_started_retains_status() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_started(1, "goto"));
        machine.apply(&step_completed(1, StepStatus::Passed));
        machine.apply(&step_started(1, "goto again"));

        let snapshot = machine.current().unwrap();
        let step = snapshot.step(1).unwrap();
        assert_eq!(step.status, StepStatus::Passed);
        assert_eq!(step.action, "goto again");
    }

    #[test]
    fn test_counters_recomputed_on_correction() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(1, StepStatus::Failed));
        machine.apply(&step_completed(2, StepStatus::Skipped));
        // Backend corrects step 1 after a flaky re-check.
        machine.apply(&step_completed(1, StepStatus::Passed));

        let snapshot = machine.current().unwrap();
        assert_eq!(snapshot.pass_count, 1);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_reported_counters_win_at_completion() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(1, StepStatus::Passed));
        machine.apply(&completed("r-1", RunOutcome::Failed, 5, 2));

        let snapshot = machine.current().unwrap();
        assert_eq!(snapshot.status, RunStatus::Failed);
        assert_eq!(snapshot.pass_count, 5);
        assert_eq!(snapshot.error_count, 2);
    }

    #[test]
    fn test_steps_enumerate_in_ascending_order() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(3, StepStatus::Passed));
        machine.apply(&step_completed(1, StepStatus::Passed));
        machine.apply(&step_completed(2, StepStatus::Failed));

        let numbers: Vec<u32> = machine
            .current()
            .unwrap()
            .steps()
            .map(|s| s.step_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_retry_produces_linked_snapshots() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(1, StepStatus::Failed));
        machine.apply(&completed("r-1", RunOutcome::Failed, 0, 1));
        machine.apply(&RunEvent::RetryScheduled {
            original_run_id: "r-1".to_string(),
            retry_attempt: 1,
            reason: "1 step failed".to_string(),
        });

        assert!(machine.retry_notice().is_some());

        machine.apply(&started("r-2", 1, Some("r-1")));
        machine.apply(&step_completed(1, StepStatus::Passed));
        machine.apply(&completed("r-2", RunOutcome::Passed, 1, 0));
        machine.finish();

        assert!(machine.retry_notice().is_none());
        assert_eq!(machine.retired().len(), 1);
        assert_eq!(machine.retired()[0].run_id, "r-1");
        assert_eq!(machine.retired()[0].status, RunStatus::Failed);

        let current = machine.current().unwrap();
        assert_eq!(current.run_id, "r-2");
        assert_eq!(current.original_run_id.as_deref(), Some("r-1"));
        assert_eq!(current.status, RunStatus::Passed);

        let chain = machine.into_chain();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_diagnostics_never_change_status() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&RunEvent::Warning {
            message: "slow selector".to_string(),
        });
        machine.apply(&RunEvent::Error {
            message: "console error".to_string(),
        });

        assert_eq!(machine.current().unwrap().status, RunStatus::Running);
        assert_eq!(machine.notices().len(), 2);
    }

    #[test]
    fn test_snapshot_serializes_steps_as_ordered_array() {
        let mut machine = RunStateMachine::new();
        machine.apply(&started("r-1", 0, None));
        machine.apply(&step_completed(2, StepStatus::Passed));
        machine.apply(&step_completed(1, StepStatus::Passed));

        let json = serde_json::to_value(machine.current().unwrap()).unwrap();
        let steps = json["steps"].as_array().unwrap();
        assert_eq!(steps[0]["step_number"], 1);
        assert_eq!(steps[1]["step_number"], 2);
    }
}
