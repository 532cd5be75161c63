//! Compiled graph execution

use super::checkpoint::{Checkpoint, Checkpointer, PendingInterrupt};
use super::node::NodeFn;
use super::{Edge, END, START};
use crate::error::FlowError;
use crate::flow::RunScope;
use crate::state_machine::{ChatbotState, Message, SessionPhase, State};
use std::collections::HashMap;
use std::sync::Arc;

/// How an `invoke` or `resume` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOutcome {
    /// The run reached [`END`]
    Completed,
    /// `node` is waiting for user input
    Suspended { node: String },
}

/// Last checkpointed state of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// `None` until the session's first checkpoint
    pub values: Option<State>,
    pub next: Vec<String>,
    pub interrupt: Option<PendingInterrupt>,
}

impl Snapshot {
    pub fn is_new_session(&self) -> bool {
        self.values.is_none()
    }

    /// Check if the next message should resume a paused node
    pub fn is_suspended(&self) -> bool {
        self.interrupt.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.values, &self.interrupt) {
            (None, _) => SessionPhase::NewSession,
            (Some(_), Some(interrupt)) => SessionPhase::SuspendedForInput {
                node: interrupt.node.clone(),
            },
            (Some(_), None) => SessionPhase::ReadyForNextCycle,
        }
    }

    pub fn chatbot_state(&self) -> Option<&ChatbotState> {
        self.values.as_ref().map(|v| &v.chatbot_state)
    }
}

/// Immutable, runnable graph produced by [`super::GraphBuilder::compile`]
pub struct CompiledGraph {
    nodes: HashMap<String, NodeFn>,
    edges: HashMap<String, Edge>,
    entry_point: String,
    checkpointer: Arc<dyn Checkpointer>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<_> = self.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("CompiledGraph")
            .field("entry_point", &self.entry_point)
            .field("nodes", &nodes)
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub(super) fn new(
        nodes: HashMap<String, NodeFn>,
        edges: HashMap<String, Edge>,
        entry_point: String,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            nodes,
            edges,
            entry_point,
            checkpointer,
        }
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub async fn get_state(&self, thread_id: &str) -> Result<Snapshot, FlowError> {
        Ok(self
            .load(thread_id)
            .await?
            .map_or_else(Snapshot::default, |checkpoint| Snapshot {
                values: Some(checkpoint.values),
                next: checkpoint.next,
                interrupt: checkpoint.interrupt,
            }))
    }

    /// Start a run at the entry point.
    ///
    /// `input` is folded into the last checkpointed state with the state
    /// reducer. Any pending interrupt is discarded.
    pub async fn invoke(&self, input: State, scope: &RunScope) -> Result<GraphOutcome, FlowError> {
        let thread_id = scope.config().thread_id()?;
        let (values, step) = match self.load(thread_id).await? {
            Some(previous) => (previous.values.merge(input), previous.step),
            None => (input, 0),
        };
        self.execute(thread_id, values, self.entry_point.clone(), Vec::new(), step, scope)
            .await
    }

    /// Deliver `value` to the suspended node and re-execute it from its start
    pub async fn resume(
        &self,
        value: Message,
        scope: &RunScope,
    ) -> Result<GraphOutcome, FlowError> {
        let thread_id = scope.config().thread_id()?;
        let Some(checkpoint) = self.load(thread_id).await? else {
            return Err(FlowError::NothingToResume(thread_id.to_string()));
        };
        let Some(PendingInterrupt {
            node,
            mut resume_values,
        }) = checkpoint.interrupt
        else {
            return Err(FlowError::NothingToResume(thread_id.to_string()));
        };

        resume_values.push(value);
        tracing::debug!(thread_id, node = %node, answers = resume_values.len(), "Resuming node");
        self.execute(
            thread_id,
            checkpoint.values,
            node,
            resume_values,
            checkpoint.step,
            scope,
        )
        .await
    }

    /// Drop every checkpoint of a session
    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), FlowError> {
        self.checkpointer
            .delete(thread_id)
            .await
            .map_err(FlowError::Checkpoint)
    }

    async fn execute(
        &self,
        thread_id: &str,
        mut values: State,
        start: String,
        mut resume_values: Vec<Message>,
        mut step: u64,
        scope: &RunScope,
    ) -> Result<GraphOutcome, FlowError> {
        let limit = scope.recursion_limit();
        let mut executed = 0u32;
        let mut previous = START.to_string();
        let mut current = start;

        loop {
            if executed >= limit {
                tracing::error!(thread_id, limit, node = %current, "Recursion limit reached");
                return Err(FlowError::RecursionLimit { limit });
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| FlowError::UnknownNode {
                    from: previous.clone(),
                    target: current.clone(),
                })?;

            executed += 1;
            step += 1;
            tracing::debug!(thread_id, node = %current, step, "Executing node");

            let answers = resume_values.clone();
            let result = node
                .call(values.clone(), |handle| scope.context(&current, answers, handle))
                .await;

            match result {
                Ok(command) => {
                    values = values.merge(command.update);
                    resume_values.clear();
                    let next = command
                        .goto
                        .unwrap_or_else(|| self.route(&current, &values.chatbot_state));

                    if next == END {
                        self.save(Checkpoint::new(thread_id, values, vec![], step, None))
                            .await?;
                        return Ok(GraphOutcome::Completed);
                    }

                    self.save(Checkpoint::new(
                        thread_id,
                        values.clone(),
                        vec![next.clone()],
                        step,
                        None,
                    ))
                    .await?;
                    previous = std::mem::replace(&mut current, next);
                }
                Err(FlowError::Interrupted) => {
                    tracing::info!(
                        thread_id,
                        node = %current,
                        answers = resume_values.len(),
                        "Node suspended for user input"
                    );
                    // pre-node state: the node starts over on resume
                    let interrupt = PendingInterrupt {
                        node: current.clone(),
                        resume_values,
                    };
                    self.save(Checkpoint::new(
                        thread_id,
                        values,
                        vec![current.clone()],
                        step,
                        Some(interrupt),
                    ))
                    .await?;
                    return Ok(GraphOutcome::Suspended { node: current });
                }
                Err(e) => {
                    tracing::warn!(thread_id, node = %current, error = %e, "Node failed");
                    return Err(e);
                }
            }
        }
    }

    /// Next node after `from` when the node itself did not pick one.
    /// A node without an outgoing edge ends the run.
    fn route(&self, from: &str, state: &ChatbotState) -> String {
        match self.edges.get(from) {
            Some(Edge::Static(to)) => to.clone(),
            Some(Edge::Conditional(route)) => route(state),
            None => END.to_string(),
        }
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, FlowError> {
        self.checkpointer
            .load(thread_id)
            .await
            .map_err(FlowError::Checkpoint)
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), FlowError> {
        self.checkpointer
            .save(checkpoint)
            .await
            .map_err(FlowError::Checkpoint)
    }
}
