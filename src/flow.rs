//! Chatbot flows
//!
//! Implement [`ChatbotFlow`] to describe a conversation graph, then hand it to
//! [`FlowRunner::builder`]. The runner compiles the graph once and processes
//! inbound messages with [`FlowRunner::run`].
//!
//! Keep `wait_user_input` as the first statement of a dedicated node. The node
//! re-executes from its start once the answer arrives, so any response sent
//! or state written before the wait happens twice. The runner flags such
//! nodes at runtime, see [`ReentrancyLint`].

pub mod context;
pub mod lint;
pub mod runner;


pub use context::{FlowServices, NodeContext, RunScope};
pub use lint::{ReentrancyFinding, ReentrancyLint};
pub use runner::{prepare_state, FlowRunner, FlowRunnerBuilder, RunOutcome, RunReport};

use crate::graph::GraphBuilder;
use crate::session::SessionConfig;
use crate::state_machine::{ChatbotState, Message};
use async_trait::async_trait;

/// A conversation graph plus its session hooks
#[async_trait]
pub trait ChatbotFlow: Send + Sync + 'static {
    /// Register nodes and the entry point
    fn declare_nodes(&self, graph: &mut GraphBuilder);

    /// Register edges. Flows that route only with returned transitions can
    /// skip this.
    fn declare_transitions(&self, _graph: &mut GraphBuilder) {}

    /// Called once, for the first message of a session. Returning false drops
    /// the message without running the graph or storing anything.
    async fn on_session_start(&self, _message: &Message, _config: &SessionConfig) -> bool {
        true
    }

    /// Called by [`FlowRunner::end_session`] before the session's checkpoints
    /// are deleted
    async fn on_session_end(&self, _state: Option<&ChatbotState>, _session_id: &str) {}
}
