use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::backend::{BackendClient, BackendError};
use crate::models::RunRequest;
use crate::runs::events::RunEvent;
use crate::runs::state::{RunSnapshot, RunStateMachine};

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<RwLock<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cancel(&self) {
        let mut cancelled = self.cancelled.write().await;
        *cancelled = true;
    }

    pub async fn is_cancelled(&self) -> bool {
        *self.cancelled.read().await
    }
}

// ============================================================================
// REQUEST MANAGER
// ============================================================================

/// Registry of in-flight runs, keyed by request id. Backs the cancel
/// endpoint.
#[derive(Default)]
pub struct RequestManager {
    active_requests: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: String) -> CancellationToken {
        let token = CancellationToken::new();
        let mut requests = self.active_requests.write().await;
        requests.insert(request_id, token.clone());
        token
    }

    pub async fn cancel(&self, request_id: &str) -> bool {
        let requests = self.active_requests.read().await;
        if let Some(token) = requests.get(request_id) {
            token.cancel().await;
            true
        } else {
            false
        }
    }

    pub async fn unregister(&self, request_id: &str) {
        let mut requests = self.active_requests.write().await;
        requests.remove(request_id);
    }
}

// ============================================================================
// RUN UPDATES
// ============================================================================

/// Progress updates emitted while a run executes, one SSE frame each.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunUpdate {
    Accepted {
        request_id: String,
        timestamp: i64,
    },

    // Raw backend event, forwarded in arrival order
    Event {
        request_id: String,
        event: RunEvent,
    },

    // Folded view of the active attempt
    Snapshot {
        request_id: String,
        snapshot: RunSnapshot,
    },

    Finished {
        request_id: String,
        chain: Vec<RunSnapshot>,
        timestamp: i64,
    },

    Cancelled {
        request_id: String,
        reason: String,
    },

    Failed {
        request_id: String,
        error: String,
    },
}

impl RunUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunUpdate::Finished { .. } | RunUpdate::Cancelled { .. } | RunUpdate::Failed { .. }
        )
    }
}

// ============================================================================
// RUN EXECUTOR
// ============================================================================

/// Drives run exchanges against the backend and folds their event streams.
///
/// Retry orchestration lives here, as explicit control flow: when the state
/// machine surfaces a retry notice, the executor opens a fresh exchange
/// annotated with the retry lineage instead of mutating the finished
/// attempt.
pub struct RunExecutor {
    backend: Arc<BackendClient>,
    request_manager: Arc<RequestManager>,
}

impl RunExecutor {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self {
            backend,
            request_manager: Arc::new(RequestManager::new()),
        }
    }

    pub async fn handle_run_stream(&self, request: RunRequest) -> mpsc::Receiver<RunUpdate> {
        let (tx, rx) = mpsc::channel(100);

        let backend = self.backend.clone();
        let request_manager = self.request_manager.clone();

        tokio::spawn(async move {
            let request_id = Uuid::now_v7().to_string();
            let token = request_manager.register(request_id.clone()).await;

            let _ = tx
                .send(RunUpdate::Accepted {
                    request_id: request_id.clone(),
                    timestamp: chrono::Utc::now().timestamp(),
                })
                .await;

            let result = Self::process_run(&backend, request, &request_id, &token, &tx).await;

            match result {
                Ok(RunOutcomeKind::Completed(chain)) => {
                    let _ = tx
                        .send(RunUpdate::Finished {
                            request_id: request_id.clone(),
                            chain,
                            timestamp: chrono::Utc::now().timestamp(),
                        })
                        .await;
                }
                Ok(RunOutcomeKind::Cancelled) => {
                    let _ = tx
                        .send(RunUpdate::Cancelled {
                            request_id: request_id.clone(),
                            reason: "Run cancelled by caller".to_string(),
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(RunUpdate::Failed {
                            request_id: request_id.clone(),
                            error: e.to_string(),
                        })
                        .await;
                }
            }

            request_manager.unregister(&request_id).await;
        });

        rx
    }

    async fn process_run(
        backend: &BackendClient,
        request: RunRequest,
        request_id: &str,
        token: &CancellationToken,
        tx: &mpsc::Sender<RunUpdate>,
    ) -> Result<RunOutcomeKind, BackendError> {
        let mut machine = RunStateMachine::new();
        let mut attempt_request = request;

        loop {
            // The stream borrows the attempt request; keep it scoped so the
            // request can be re-annotated for the next attempt below.
            {
                let events = backend.execute_run(&attempt_request).await?;
                futures::pin_mut!(events);

                while let Some(event) = events.next().await {
                    if token.is_cancelled().await {
                        // Dropping the stream aborts the upstream read.
                        return Ok(RunOutcomeKind::Cancelled);
                    }

                    machine.apply(&event);

                    let snapshot_due =
                        event.is_terminal() || matches!(event, RunEvent::StepCompleted { .. });

                    let sent = tx
                        .send(RunUpdate::Event {
                            request_id: request_id.to_string(),
                            event,
                        })
                        .await;
                    if sent.is_err() {
                        // Consumer went away; abandon the exchange instead of
                        // draining it to completion.
                        return Ok(RunOutcomeKind::Cancelled);
                    }

                    if snapshot_due {
                        if let Some(snapshot) = machine.current() {
                            let _ = tx
                                .send(RunUpdate::Snapshot {
                                    request_id: request_id.to_string(),
                                    snapshot: snapshot.clone(),
                                })
                                .await;
                        }
                    }
                }
            }

            machine.finish();

            match machine.take_retry_notice() {
                Some(retry) if !token.is_cancelled().await => {
                    log::info!(
                        "🔁 Run {} retrying (attempt {}): {}",
                        retry.original_run_id,
                        retry.retry_attempt,
                        retry.reason
                    );
                    attempt_request.original_run_id = Some(retry.original_run_id);
                    attempt_request.retry_attempt = Some(retry.retry_attempt);
                }
                _ => break,
            }
        }

        Ok(RunOutcomeKind::Completed(machine.into_chain()))
    }

    pub async fn cancel_run(&self, request_id: &str) -> bool {
        self.request_manager.cancel(request_id).await
    }
}

enum RunOutcomeKind {
    Completed(Vec<RunSnapshot>),
    Cancelled,
}

// ============================================================================
// TESTS
// ============================================================================
