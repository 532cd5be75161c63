//! chatflow - conversational flows on a checkpointing graph engine
//!
//! A flow is a set of async node functions wired together with static edges,
//! conditional edges, or [`Transition`] commands returned from nodes. The
//! [`FlowRunner`] owns the conversation state machine: it decides between
//! starting a new conversation cycle and resuming a node that is waiting for
//! user input, and it checkpoints state after every node so in-place
//! mutations made through [`StateHandle`] survive without explicit returns.
//!
//! Node functions re-execute from their start when a session resumes after
//! [`NodeContext::wait_user_input`]. Keep the wait as the first statement of a
//! dedicated node.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod config;
pub mod error;
pub mod flow;
pub mod graph;
pub mod localization;
pub mod rest;
pub mod session;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ChatbotConfiguration, ConcurrentSessionPolicy, LanguageDetectorConfig};
pub use error::FlowError;
pub use flow::{ChatbotFlow, FlowRunner, NodeContext, RunOutcome, RunReport};
pub use graph::{GraphBuilder, NodeFn, NodeParams, StateHandle, END};
pub use session::SessionConfig;
pub use state_machine::{
    ChatbotState, ConversationCycle, Message, NodeOutput, Role, SessionPhase, State, Transition,
};
