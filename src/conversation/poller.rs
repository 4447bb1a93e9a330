//! Run-completion polling.
//!
//! A run moves through remote states until it completes or fails. The
//! poller queries its status at a constant interval (no backoff) and
//! folds the remote states into [`PollState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::gateway::{AssistantGateway, GatewayError, Run, RunStatus};

/// Default interval between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Local view of a run's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Accepted but not yet picked up.
    Queued,
    /// Any non-terminal remote status.
    InProgress,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl PollState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<RunStatus> for PollState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued => Self::Queued,
            RunStatus::InProgress
            | RunStatus::RequiresAction
            | RunStatus::Cancelling
            | RunStatus::Unknown => Self::InProgress,
            RunStatus::Completed => Self::Completed,
            // These never transition again, so waiting on them would never end.
            RunStatus::Failed
            | RunStatus::Cancelled
            | RunStatus::Expired
            | RunStatus::Incomplete => Self::Failed,
        }
    }
}

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Constant wait between two status queries.
    pub interval: Duration,
    /// Upper bound on the total wait. `None` waits until a terminal state.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

/// Why a wait ended without the run completing.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The run reached a failed terminal state.
    #[error("Run {run_id} ended with status {status}")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        reason: Option<String>,
    },

    /// The run did not finish within the configured bound.
    #[error("Run {run_id} did not finish within {waited:?}")]
    TimedOut { run_id: String, waited: Duration },

    /// The wait was cancelled by the caller.
    #[error("Waiting for run {run_id} was cancelled")]
    Cancelled { run_id: String },

    /// A status query failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Waits for runs to reach a terminal state.
#[derive(Clone)]
pub struct RunPoller {
    gateway: Arc<dyn AssistantGateway>,
    policy: PollPolicy,
}

impl std::fmt::Debug for RunPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPoller")
            .field("policy", &self.policy)
            .finish()
    }
}

impl RunPoller {
    #[must_use]
    pub fn new(gateway: Arc<dyn AssistantGateway>, policy: PollPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Poll `run_id` until it completes, fails, times out or is cancelled.
    ///
    /// Returns the final [`Run`] on completion. A failed run stops the loop
    /// immediately, without another status query.
    #[tracing::instrument(skip(self, cancel), fields(tick = tracing::field::Empty))]
    pub async fn wait_for_completion(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Run, PollError> {
        let started = Instant::now();
        let mut state = PollState::Queued;
        let mut tick: u64 = 0;

        loop {
            let run = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(PollError::Cancelled { run_id: run_id.to_string() });
                }
                run = self.gateway.get_run(thread_id, run_id) => run?,
            };
            tick += 1;
            tracing::Span::current().record("tick", tick);

            let next = PollState::from(run.status);
            if next != state {
                tracing::debug!(from = ?state, to = ?next, status = %run.status, "Run state changed");
                state = next;
            }

            match state {
                PollState::Completed => {
                    tracing::info!(ticks = tick, elapsed = ?started.elapsed(), "Run completed");
                    return Ok(run);
                }
                PollState::Failed => {
                    let reason = run.last_error.map(|e| format!("{}: {}", e.code, e.message));
                    tracing::warn!(status = %run.status, reason = ?reason, "Run failed");
                    return Err(PollError::RunFailed {
                        run_id: run.id,
                        status: run.status,
                        reason,
                    });
                }
                PollState::Queued | PollState::InProgress => {}
            }

            if let Some(max_wait) = self.policy.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    tracing::warn!(waited = ?waited, "Run wait exceeded bound");
                    return Err(PollError::TimedOut {
                        run_id: run_id.to_string(),
                        waited,
                    });
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(PollError::Cancelled { run_id: run_id.to_string() });
                }
                () = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }
}
