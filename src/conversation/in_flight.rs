//! Single-slot guard for the one operation allowed to run at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations that occupy the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SendMessage,
    UploadFile,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendMessage => f.write_str("message send"),
            Self::UploadFile => f.write_str("file upload"),
        }
    }
}

/// Public view of the occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightInfo {
    pub id: Uuid,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Active {
    info: InFlightInfo,
    cancel: CancellationToken,
}

/// Holds at most one running operation.
///
/// [`InFlightSlot::begin`] checks and claims the slot under one lock, so two
/// callers can never both succeed.
#[derive(Debug, Clone, Default)]
pub struct InFlightSlot {
    current: Arc<Mutex<Option<Active>>>,
}

impl InFlightSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `operation`.
    ///
    /// Returns the operation already holding the slot if it is taken.
    pub fn begin(&self, operation: Operation) -> Result<InFlightGuard, Operation> {
        let mut current = self.lock();
        if let Some(active) = current.as_ref() {
            return Err(active.info.operation);
        }

        let info = InFlightInfo {
            id: Uuid::new_v4(),
            operation,
            started_at: Utc::now(),
        };
        let cancel = CancellationToken::new();
        *current = Some(Active {
            info: info.clone(),
            cancel: cancel.clone(),
        });

        Ok(InFlightGuard {
            slot: Arc::clone(&self.current),
            id: info.id,
            cancel,
        })
    }

    /// The running operation, if any.
    #[must_use]
    pub fn current(&self) -> Option<InFlightInfo> {
        self.lock().as_ref().map(|active| active.info.clone())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// Signal cancellation to the running operation.
    ///
    /// The slot stays occupied until the operation observes the signal and
    /// drops its guard.
    pub fn cancel(&self) -> Option<Operation> {
        let current = self.lock();
        current.as_ref().map(|active| {
            active.cancel.cancel();
            active.info.operation
        })
    }
}

/// Proof of holding the slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct InFlightGuard {
    slot: Arc<Mutex<Option<Active>>>,
    id: Uuid,
    cancel: CancellationToken,
}

impl InFlightGuard {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token cancelled by [`InFlightSlot::cancel`].
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut current = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|active| active.info.id == self.id) {
            *current = None;
        }
    }
}
