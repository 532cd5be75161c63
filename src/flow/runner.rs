//! Flow runner
//!
//! Owns the invocation lifecycle of every session: decide between resuming a
//! suspended node and opening a new conversation cycle, gate first contact
//! through `on_session_start`, and drive the compiled graph.

use super::context::{FlowServices, RunScope};
use super::lint::ReentrancyFinding;
use super::ChatbotFlow;
use crate::channels::{ChannelDispatch, OmniChannelDispatcher};
use crate::config::{ChatbotConfiguration, DEFAULT_RECURSION_LIMIT, MAX_RECURSION_LIMIT};
use crate::error::FlowError;
use crate::graph::{
    Checkpointer, CompiledGraph, GraphBuilder, GraphOutcome, MemoryCheckpointer, Snapshot,
};
use crate::localization::{StaticTranslationTable, TranslationTable};
use crate::session::{Outbound, SessionConfig};
use crate::state_machine::{ChatbotState, Message, SessionPhase, State};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Language used when neither the call, the configuration nor the session
/// names one
pub const FALLBACK_LANGUAGE: &str = "en";

/// How a `run` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// `on_session_start` refused the session; nothing ran, nothing was stored
    Rejected,
    /// The conversation cycle reached the end
    Completed,
    /// `node` waits for the next user message
    Suspended { node: String },
}

impl From<GraphOutcome> for RunOutcome {
    fn from(outcome: GraphOutcome) -> Self {
        match outcome {
            GraphOutcome::Completed => RunOutcome::Completed,
            GraphOutcome::Suspended { node } => RunOutcome::Suspended { node },
        }
    }
}

/// Result of one `run` call
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Responses collected for synchronous delivery, in order
    pub responses: Vec<Value>,
    /// State handed back to an embedding chatbot
    pub parent_state: Map<String, Value>,
}

impl RunReport {
    fn new(outcome: RunOutcome, outbound: &Outbound) -> Self {
        Self {
            outcome,
            responses: outbound.responses(),
            parent_state: outbound.parent_state(),
        }
    }
}

// ============================================================================
// Session locks
// ============================================================================

/// One async mutex per session. Held for a whole `run`, so messages of a
/// session are processed one at a time in lock acquisition order.
///
/// An entry lives as long as some caller holds or waits on its mutex.
#[derive(Debug, Default)]
struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, thread_id: &str) -> SessionLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        SessionLease {
            locks: self,
            thread_id: thread_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drop the entry for `thread_id` unless another caller still references it
    fn release(&self, thread_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one session until dropped
struct SessionLease<'a> {
    locks: &'a SessionLocks,
    thread_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.thread_id);
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct FlowRunnerBuilder<F> {
    flow: F,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    configuration: Option<ChatbotConfiguration>,
    translations: Option<Arc<dyn TranslationTable>>,
    channel: Option<Arc<dyn ChannelDispatch>>,
    environment: HashMap<String, String>,
}

impl<F: ChatbotFlow> FlowRunnerBuilder<F> {
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: ChatbotConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    #[must_use]
    pub fn with_translation_table(mut self, translations: Arc<dyn TranslationTable>) -> Self {
        self.translations = Some(translations);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn ChannelDispatch>) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Run the flow's declaration hooks and compile the graph
    pub fn build(self) -> Result<FlowRunner<F>, FlowError> {
        let mut graph = GraphBuilder::new();
        self.flow.declare_nodes(&mut graph);
        self.flow.declare_transitions(&mut graph);

        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(MemoryCheckpointer::new()));
        let graph = graph.compile(checkpointer)?;

        let channel: Arc<dyn ChannelDispatch> = match self.channel {
            Some(channel) => channel,
            None => Arc::new(OmniChannelDispatcher::from_env()?),
        };
        let translations = self
            .translations
            .unwrap_or_else(|| Arc::new(StaticTranslationTable::default()));

        let mut services = FlowServices::new(channel, translations);
        services.environment = self.environment;
        services.strict_suspension = self
            .configuration
            .as_ref()
            .is_some_and(|c| c.strict_suspension);

        tracing::info!(entry_point = graph.entry_point(), "Flow compiled");

        Ok(FlowRunner {
            flow: self.flow,
            graph,
            configuration: self.configuration,
            services: Arc::new(services),
            locks: SessionLocks::default(),
        })
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs a compiled [`ChatbotFlow`] for any number of sessions
pub struct FlowRunner<F> {
    flow: F,
    graph: CompiledGraph,
    configuration: Option<ChatbotConfiguration>,
    services: Arc<FlowServices>,
    locks: SessionLocks,
}

impl<F: ChatbotFlow> FlowRunner<F> {
    pub fn builder(flow: F) -> FlowRunnerBuilder<F> {
        FlowRunnerBuilder {
            flow,
            checkpointer: None,
            configuration: None,
            translations: None,
            channel: None,
            environment: HashMap::new(),
        }
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn configuration(&self) -> Option<&ChatbotConfiguration> {
        self.configuration.as_ref()
    }

    /// Nodes that waited for input after side effects, one entry per node
    pub fn reentrancy_findings(&self) -> Vec<ReentrancyFinding> {
        self.services.lint.findings()
    }

    /// Process one inbound message.
    ///
    /// A session suspended in `wait_user_input` resumes with `message`.
    /// Otherwise `message` opens a new conversation cycle and the graph
    /// starts at its entry point; the first message of a session has to
    /// pass `on_session_start` first.
    pub async fn run(
        &self,
        message: Message,
        config: &SessionConfig,
    ) -> Result<RunReport, FlowError> {
        let thread_id = config.thread_id()?;
        let _lease = self.locks.acquire(thread_id).await;

        let scope = RunScope::new(
            config.clone(),
            Arc::clone(&self.services),
            Outbound::new(),
            self.recursion_limit(config),
        );
        let snapshot = self.graph.get_state(thread_id).await?;
        let phase = snapshot.phase();

        let outcome = if phase.is_suspended() {
            tracing::info!(thread_id, phase = ?phase, "Resuming suspended session");
            tracing::debug!(thread_id, phase = ?SessionPhase::Running, "Executing graph");
            self.graph.resume(message, &scope).await?
        } else {
            if phase == SessionPhase::NewSession {
                tracing::debug!(
                    thread_id,
                    phase = ?SessionPhase::AwaitingStartAuthorization,
                    "First message in session"
                );
                if !self.flow.on_session_start(&message, config).await {
                    tracing::info!(thread_id, "Session start rejected");
                    return Ok(RunReport::new(RunOutcome::Rejected, scope.outbound()));
                }
            }

            let state = prepare_state(
                message,
                snapshot.values.map(|v| v.chatbot_state),
                config.language(),
                self.default_language(),
            );
            tracing::info!(
                thread_id,
                phase = ?phase,
                cycle = state.conversation_cycles.len(),
                language = %state.user_language,
                "Starting conversation cycle"
            );
            tracing::debug!(thread_id, phase = ?SessionPhase::Running, "Executing graph");
            self.graph.invoke(State::new(state), &scope).await?
        };

        tracing::debug!(thread_id, outcome = ?outcome, "Run finished");
        Ok(RunReport::new(outcome.into(), scope.outbound()))
    }

    /// Last checkpointed chatbot state, `None` for unknown sessions
    pub async fn get_state(
        &self,
        config: &SessionConfig,
    ) -> Result<Option<ChatbotState>, FlowError> {
        Ok(self
            .snapshot(config)
            .await?
            .values
            .map(|v| v.chatbot_state))
    }

    pub async fn snapshot(&self, config: &SessionConfig) -> Result<Snapshot, FlowError> {
        self.graph.get_state(config.thread_id()?).await
    }

    /// Lifecycle phase the next `run` call will start from
    pub async fn session_phase(&self, config: &SessionConfig) -> Result<SessionPhase, FlowError> {
        Ok(self.snapshot(config).await?.phase())
    }

    /// Close a session: notify the flow, then forget its checkpoints
    pub async fn end_session(&self, config: &SessionConfig) -> Result<(), FlowError> {
        let thread_id = config.thread_id()?;
        let _lease = self.locks.acquire(thread_id).await;

        let state = self.get_state(config).await?;
        self.flow.on_session_end(state.as_ref(), thread_id).await;
        self.graph.delete_thread(thread_id).await?;
        tracing::info!(thread_id, phase = ?SessionPhase::Terminated, "Session ended");
        Ok(())
    }

    fn default_language(&self) -> Option<&str> {
        self.configuration
            .as_ref()
            .map(|c| c.default_language.as_str())
    }

    /// Per-call override, then configuration, then the default; capped
    fn recursion_limit(&self, config: &SessionConfig) -> u32 {
        config
            .recursion_limit()
            .or_else(|| {
                self.configuration
                    .as_ref()
                    .and_then(ChatbotConfiguration::effective_recursion_limit)
            })
            .unwrap_or(DEFAULT_RECURSION_LIMIT)
            .min(MAX_RECURSION_LIMIT)
    }
}

/// State a new conversation cycle starts from.
///
/// The language is the per-call override, else the configured default, else
/// the session's previous language, else [`FALLBACK_LANGUAGE`]. A session
/// without previous state gets a single cycle holding `message`; otherwise a
/// new cycle is appended, keeping variables and the last intent.
pub fn prepare_state(
    message: Message,
    previous: Option<ChatbotState>,
    language_override: Option<&str>,
    default_language: Option<&str>,
) -> ChatbotState {
    let language = language_override
        .or(default_language)
        .map(str::to_string)
        .or_else(|| {
            previous
                .as_ref()
                .map(|p| p.user_language.clone())
                .filter(|l| !l.is_empty())
        })
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string());

    match previous {
        Some(previous) if !previous.is_empty() => previous.begin_cycle(message, language),
        _ => ChatbotState::start(message, language),
    }
}
