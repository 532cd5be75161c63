//! Conversation state types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Content keys
// ============================================================================

/// Key holding the content type of a channel payload
pub const TYPE: &str = "type";
/// Key holding the text of a text payload
pub const TEXT: &str = "text";
/// Key holding the reply payload of a button reply
pub const PAYLOAD: &str = "payload";
/// Postback key used by outbound buttons and some inbound button replies
pub const POSTBACK_DATA: &str = "postbackData";
/// Outbound payloads nest their content under this key
pub const BODY: &str = "body";

pub const TEXT_TYPE: &str = "TEXT";
pub const BUTTON_REPLY_TYPE: &str = "BUTTON_REPLY";

// ============================================================================
// Messages
// ============================================================================

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single inbound or outbound message.
///
/// `content` is channel-formatted and owned by the channel layer; the state
/// machine only peeks at it for [`Message::text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Value,
}

impl Message {
    pub fn new(role: Role, content: Value) -> Self {
        Self { role, content }
    }

    pub fn user(content: Value) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: Value) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Inbound text message in the `{"type": "TEXT", "text": ...}` shape
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(text_content(text))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(text_content(text))
    }

    /// Text representation of the message, if it has one.
    ///
    /// Text payloads yield their text, button replies yield the reply
    /// payload. Outbound payloads are looked up under their `body`.
    pub fn text(&self) -> Option<&str> {
        let content = if self.content.get(TYPE).is_some() {
            &self.content
        } else {
            self.content.get(BODY)?
        };
        let kind = content.get(TYPE)?.as_str()?;
        if kind.eq_ignore_ascii_case(TEXT_TYPE) {
            content.get(TEXT)?.as_str()
        } else if kind.eq_ignore_ascii_case(BUTTON_REPLY_TYPE) {
            content
                .get(PAYLOAD)
                .or_else(|| content.get(POSTBACK_DATA))?
                .as_str()
        } else {
            None
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        self.content.get(PAYLOAD)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

fn text_content(text: impl Into<String>) -> Value {
    serde_json::json!({ TYPE: TEXT_TYPE, TEXT: text.into() })
}

// ============================================================================
// Conversation cycles
// ============================================================================

/// One pass through the graph, from the entry node to the terminal node.
///
/// A new cycle opens with the first user message of a session and again each
/// time a message arrives after the previous cycle reached the end.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversationCycle {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub intent: Option<String>,
}

impl ConversationCycle {
    pub fn new(first: Message) -> Self {
        Self {
            messages: vec![first],
            intent: None,
        }
    }

    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }
}

// ============================================================================
// Chatbot state
// ============================================================================

/// The per-session payload checkpointed after every node.
///
/// Cycles are append-only and the current cycle is always the last one.
/// Variables live across cycles, last write wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatbotState {
    pub conversation_cycles: Vec<ConversationCycle>,
    pub user_language: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl ChatbotState {
    /// State of a brand new session: a single cycle holding `message`
    pub fn start(message: Message, language: impl Into<String>) -> Self {
        Self {
            conversation_cycles: vec![ConversationCycle::new(message)],
            user_language: language.into(),
            variables: Map::new(),
        }
    }

    /// Open the next cycle with `message`.
    ///
    /// Variables carry over untouched and the new cycle starts with the
    /// intent the previous cycle ended with.
    pub fn begin_cycle(mut self, message: Message, language: impl Into<String>) -> Self {
        let intent = self.current_cycle().and_then(|c| c.intent.clone());
        self.conversation_cycles
            .push(ConversationCycle::new(message).with_intent(intent));
        self.user_language = language.into();
        self
    }

    /// An empty state never replaces a checkpointed one, see [`reduce_state`]
    pub fn is_empty(&self) -> bool {
        self.conversation_cycles.is_empty()
            && self.variables.is_empty()
            && self.user_language.is_empty()
    }

    pub fn current_cycle(&self) -> Option<&ConversationCycle> {
        self.conversation_cycles.last()
    }

    pub fn current_cycle_mut(&mut self) -> Option<&mut ConversationCycle> {
        self.conversation_cycles.last_mut()
    }

    /// Most recent user message of the current cycle
    pub fn user_message(&self) -> Option<&Message> {
        self.current_cycle()?
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
    }

    /// Most recent message of the current cycle, whoever sent it
    pub fn last_message(&self) -> Option<&Message> {
        self.current_cycle()?.messages.last()
    }

    pub fn intent(&self) -> Option<&str> {
        self.current_cycle()?.intent.as_deref()
    }

    pub fn set_intent(&mut self, intent: impl Into<String>) {
        if let Some(cycle) = self.current_cycle_mut() {
            cycle.intent = Some(intent.into());
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Append to the current cycle, opening one if the session has none yet
    pub fn push_message(&mut self, message: Message) {
        match self.current_cycle_mut() {
            Some(cycle) => cycle.messages.push(message),
            None => self.conversation_cycles.push(ConversationCycle::new(message)),
        }
    }
}

/// Engine-level state. The chatbot payload sits under the fixed
/// `chatbot_state` key of every checkpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub chatbot_state: ChatbotState,
}

impl State {
    pub fn new(chatbot_state: ChatbotState) -> Self {
        Self { chatbot_state }
    }

    /// Fold an update into this state with [`reduce_state`]
    #[must_use]
    pub fn merge(self, update: State) -> State {
        State {
            chatbot_state: reduce_state(self.chatbot_state, update.chatbot_state),
        }
    }
}

/// State reducer: the update wins unless it is empty. Fields are never
/// merged individually.
pub fn reduce_state(current: ChatbotState, update: ChatbotState) -> ChatbotState {
    if update.is_empty() {
        current
    } else {
        update
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Where a session stands in the invocation lifecycle.
///
/// `NewSession`, `SuspendedForInput` and `ReadyForNextCycle` are observable
/// between `run` calls; the remaining phases only exist while a `run` call is
/// in progress and show up in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPhase {
    /// No checkpoint exists for the session
    NewSession,
    /// First message received, waiting on `on_session_start`
    AwaitingStartAuthorization,
    /// Graph is executing nodes
    Running,
    /// A node is paused in `wait_user_input`
    SuspendedForInput { node: String },
    /// The current run reached the terminal node
    Terminated,
    /// Previous cycle finished; the next message opens a new cycle
    ReadyForNextCycle,
}

impl SessionPhase {
    /// Check if a session in this phase takes the resume path on `run`
    pub fn is_suspended(&self) -> bool {
        matches!(self, SessionPhase::SuspendedForInput { .. })
    }
}
