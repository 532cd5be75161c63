//! Conversation state machine
//!
//! Data model for conversation cycles plus the commands node functions hand
//! back to the engine.

pub mod command;
pub mod state;

#[cfg(test)]
mod proptests;

pub use command::{Command, NodeOutput, Transition};
pub use state::{
    reduce_state, ChatbotState, ConversationCycle, Message, Role, SessionPhase, State,
};
