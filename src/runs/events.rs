use serde::{Deserialize, Serialize};

/// One decoded frame from the backend's run stream.
///
/// The `type` tag determines the shape of the remaining fields. Tags the
/// backend may grow later decode into `Unrecognized` instead of being
/// force-fitted into a known variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    // Run lifecycle events
    RunStarted {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_case_id: Option<i64>,
        #[serde(default)]
        total_steps: u32,
        #[serde(default)]
        retry_attempt: u32,
        #[serde(default)]
        max_retries: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_run_id: Option<String>,
    },

    RunCompleted {
        run_id: String,
        status: RunOutcome,
        #[serde(default)]
        pass_count: u32,
        #[serde(default)]
        error_count: u32,
        #[serde(default)]
        summary: String,
        #[serde(default)]
        retry_attempt: u32,
        #[serde(default)]
        max_retries: u32,
    },

    // Step progress events
    StepStarted {
        step_number: u32,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture_name: Option<String>,
    },

    StepCompleted {
        step_number: u32,
        action: String,
        status: StepStatus,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retried: Option<bool>,
    },

    // Retry signalling
    RetryScheduled {
        original_run_id: String,
        retry_attempt: u32,
        #[serde(default)]
        reason: String,
    },

    // Diagnostics, never change run status
    Error {
        message: String,
    },

    Warning {
        message: String,
    },

    #[serde(other)]
    Unrecognized,
}

impl RunEvent {
    /// Terminal for one run attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunCompleted { .. })
    }
}

/// Step outcome as reported by the backend. `Running` is the in-flight state
/// between `step_started` and `step_completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Passed,
    Failed,
    Skipped,
}

/// Final run verdict carried by `run_completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_started_decodes_sparse_payload() {
        let event: RunEvent =
            serde_json::from_str(r#"{"type":"run_started","run_id":"r-1","total_steps":3}"#)
                .unwrap();

        match event {
            RunEvent::RunStarted {
                run_id,
                total_steps,
                retry_attempt,
                original_run_id,
                ..
            } => {
                assert_eq!(run_id, "r-1");
                assert_eq!(total_steps, 3);
                assert_eq!(retry_attempt, 0);
                assert!(original_run_id.is_none());
            }
            other => panic!("expected RunStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_step_completed_status_tag() {
        let event: RunEvent = serde_json::from_str(
            r#"{"type":"step_completed","step_number":2,"action":"click","status":"failed","duration_ms":120,"error":"element not found"}"#,
        )
        .unwrap();

        match event {
            RunEvent::StepCompleted { status, error, .. } => {
                assert_eq!(status, StepStatus::Failed);
                assert_eq!(error.as_deref(), Some("element not found"));
            }
            other => panic!("expected StepCompleted, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_maps_to_unrecognized() {
        let event: RunEvent =
            serde_json::from_str(r#"{"type":"telemetry_blob","payload":42}"#).unwrap();
        assert!(matches!(event, RunEvent::Unrecognized));
    }

    #[test]
    fn test_terminal_detection() {
        let completed: RunEvent = serde_json::from_str(
            r#"{"type":"run_completed","run_id":"r-1","status":"passed","summary":"ok"}"#,
        )
        .unwrap();
        let warning: RunEvent =
            serde_json::from_str(r#"{"type":"warning","message":"slow step"}"#).unwrap();

        assert!(completed.is_terminal());
        assert!(!warning.is_terminal());
    }
}
