//! Node wrapper
//!
//! Node functions declare at registration time which parameters they take.
//! On every execution the wrapper hands them a fresh [`StateHandle`] over a
//! copy of the checkpointed state and folds whatever the function did to it
//! back into an engine [`Command`], so nodes never return deltas.

use crate::error::FlowError;
use crate::flow::NodeContext;
use crate::state_machine::{
    ChatbotState, Command, ConversationCycle, Message, NodeOutput, State,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type NodeFuture = BoxFuture<'static, Result<NodeOutput, FlowError>>;

/// Parameters a node function accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeParams {
    None,
    State,
    Context,
    StateAndContext,
}

type BareFn = dyn Fn() -> NodeFuture + Send + Sync;
type StateFn = dyn Fn(StateHandle) -> NodeFuture + Send + Sync;
type ContextFn = dyn Fn(NodeContext) -> NodeFuture + Send + Sync;
type StateAndContextFn = dyn Fn(StateHandle, NodeContext) -> NodeFuture + Send + Sync;

#[derive(Clone)]
enum Action {
    Bare(Arc<BareFn>),
    State(Arc<StateFn>),
    Context(Arc<ContextFn>),
    StateAndContext(Arc<StateAndContextFn>),
}

/// A registered node function
#[derive(Clone)]
pub struct NodeFn {
    action: Action,
}

impl std::fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFn")
            .field("params", &self.params())
            .finish()
    }
}

fn boxed<Fut, R>(fut: Fut) -> NodeFuture
where
    Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
    R: Into<NodeOutput>,
{
    async move { fut.await.map(Into::into) }.boxed()
}

impl NodeFn {
    /// Node that needs neither state nor context
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
        R: Into<NodeOutput>,
    {
        Self {
            action: Action::Bare(Arc::new(move || boxed(f()))),
        }
    }

    pub fn with_state<F, Fut, R>(f: F) -> Self
    where
        F: Fn(StateHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
        R: Into<NodeOutput>,
    {
        Self {
            action: Action::State(Arc::new(move |state| boxed(f(state)))),
        }
    }

    pub fn with_context<F, Fut, R>(f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
        R: Into<NodeOutput>,
    {
        Self {
            action: Action::Context(Arc::new(move |ctx| boxed(f(ctx)))),
        }
    }

    pub fn with_state_and_context<F, Fut, R>(f: F) -> Self
    where
        F: Fn(StateHandle, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
        R: Into<NodeOutput>,
    {
        Self {
            action: Action::StateAndContext(Arc::new(move |state, ctx| boxed(f(state, ctx)))),
        }
    }

    pub fn params(&self) -> NodeParams {
        match self.action {
            Action::Bare(_) => NodeParams::None,
            Action::State(_) => NodeParams::State,
            Action::Context(_) => NodeParams::Context,
            Action::StateAndContext(_) => NodeParams::StateAndContext,
        }
    }

    /// Execute the node against `state`.
    ///
    /// `context` builds the node's context around the handle the function
    /// works on. Errors, including the suspension signal, pass through
    /// untouched.
    pub async fn call<C>(&self, state: State, context: C) -> Result<Command, FlowError>
    where
        C: FnOnce(StateHandle) -> NodeContext,
    {
        let handle = StateHandle::new(state.chatbot_state);

        let output = match &self.action {
            Action::Bare(f) => f().await?,
            Action::State(f) => f(handle.clone()).await?,
            Action::Context(f) => f(context(handle.clone())).await?,
            Action::StateAndContext(f) => {
                let ctx = context(handle.clone());
                f(handle.clone(), ctx).await?
            }
        };

        Ok(match output {
            NodeOutput::NoChange => Command::update(State::new(handle.snapshot())),
            NodeOutput::ReplaceWith(replacement) => Command::update(State::new(replacement)),
            NodeOutput::TransitionTo(transition) => {
                transition.into_command(State::new(handle.snapshot()))
            }
        })
    }
}

// ============================================================================
// State handle
// ============================================================================

/// Shared, mutable view of the chatbot state for one node execution.
///
/// Clones share the same state. Every mutation through the public API is
/// counted so suspension points can tell whether the node already changed
/// state before waiting.
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<ChatbotState>>,
    mutations: Arc<AtomicUsize>,
}

impl StateHandle {
    pub fn new(state: ChatbotState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            mutations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatbotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state without copying it
    pub fn read<T>(&self, f: impl FnOnce(&ChatbotState) -> T) -> T {
        f(&self.lock())
    }

    /// Mutate the state in place
    pub fn update<T>(&self, f: impl FnOnce(&mut ChatbotState) -> T) -> T {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        f(&mut self.lock())
    }

    /// Mutation the engine performs on the node's behalf; not counted
    pub(crate) fn update_uncounted<T>(&self, f: impl FnOnce(&mut ChatbotState) -> T) -> T {
        f(&mut self.lock())
    }

    /// Number of counted mutations since the handle was created
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChatbotState {
        self.lock().clone()
    }

    pub fn get_user_message(&self) -> Option<Message> {
        self.read(|s| s.user_message().cloned())
    }

    pub fn get_last_message(&self) -> Option<Message> {
        self.read(|s| s.last_message().cloned())
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.read(|s| s.variable(name).cloned())
    }

    pub fn save_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        let (name, value) = (name.into(), value.into());
        self.update(|s| s.set_variable(name, value));
    }

    pub fn get_variables(&self) -> Map<String, Value> {
        self.read(|s| s.variables.clone())
    }

    pub fn get_intent(&self) -> Option<String> {
        self.read(|s| s.intent().map(str::to_string))
    }

    pub fn save_intent(&self, intent: impl Into<String>) {
        let intent = intent.into();
        self.update(|s| s.set_intent(intent));
    }

    /// Append to the current cycle
    pub fn save_message(&self, message: Message) {
        self.update(|s| s.push_message(message));
    }

    pub fn get_language(&self) -> String {
        self.read(|s| s.user_language.clone())
    }

    pub fn get_current_cycle(&self) -> Option<ConversationCycle> {
        self.read(|s| s.current_cycle().cloned())
    }

    pub fn get_all_cycles(&self) -> Vec<ConversationCycle> {
        self.read(|s| s.conversation_cycles.clone())
    }
}
