//! Commands produced by node functions

use super::state::{ChatbotState, State};
use crate::graph::END;

/// Dynamic transition returned from a node: "continue at `goto`".
///
/// Nodes return it instead of declaring static edges. The current state is
/// bound when the wrapper converts it into an engine [`Command`], so the node
/// never restates the state itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    goto: String,
}

impl Transition {
    pub fn to(node: impl Into<String>) -> Self {
        Self { goto: node.into() }
    }

    /// Transition to the terminal node, closing the conversation cycle
    pub fn end() -> Self {
        Self::to(END)
    }

    pub fn goto(&self) -> &str {
        &self.goto
    }

    /// Engine-native form. Carries `state` whole, never a delta.
    pub fn into_command(self, state: State) -> Command {
        Command {
            update: state,
            goto: Some(self.goto),
        }
    }
}

/// What the engine receives after every node execution
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// State to fold into the checkpoint with the state reducer
    pub update: State,
    /// Next node; `None` follows the node's declared edge
    pub goto: Option<String>,
}

impl Command {
    pub fn update(update: State) -> Self {
        Self { update, goto: None }
    }
}

/// Result of a node function
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeOutput {
    /// Keep whatever the node did to the state in place
    #[default]
    NoChange,
    /// Replace the chatbot state wholesale
    ReplaceWith(ChatbotState),
    /// Jump to another node with the current state
    TransitionTo(Transition),
}

impl From<()> for NodeOutput {
    fn from((): ()) -> Self {
        NodeOutput::NoChange
    }
}

impl From<ChatbotState> for NodeOutput {
    fn from(state: ChatbotState) -> Self {
        NodeOutput::ReplaceWith(state)
    }
}

impl From<Transition> for NodeOutput {
    fn from(transition: Transition) -> Self {
        NodeOutput::TransitionTo(transition)
    }
}

impl From<Option<Transition>> for NodeOutput {
    fn from(transition: Option<Transition>) -> Self {
        transition.map_or(NodeOutput::NoChange, NodeOutput::TransitionTo)
    }
}
