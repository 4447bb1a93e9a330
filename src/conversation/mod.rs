//! Conversation state and the send-message workflow.
//!
//! # Architecture
//!
//! - [`ConversationController`]: owns the presented state of one session
//! - [`RunPoller`]: waits for a run to reach a terminal state
//! - [`InFlightSlot`]: admits one send or upload at a time
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use assistant_chat::conversation::{
//!     AssistantDefaults, ConversationController, PollPolicy, RunPoller,
//! };
//!
//! let poller = RunPoller::new(Arc::clone(&gateway), PollPolicy::default());
//! let controller = ConversationController::new(gateway, poller, AssistantDefaults::default());
//! controller.initialize().await?;
//! controller.send_message("Hello!").await?;
//! ```

mod controller;
mod in_flight;
mod poller;

pub use controller::{
    AssistantDefaults, ControllerError, ConversationController, ConversationSnapshot,
    SendFailure, SendOutcome, SkipReason,
};
pub use in_flight::{InFlightGuard, InFlightInfo, InFlightSlot, Operation};
pub use poller::{DEFAULT_POLL_INTERVAL, PollError, PollPolicy, PollState, RunPoller};
