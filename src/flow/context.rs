//! Per-node execution context
//!
//! [`NodeContext`] is what a node function sees of the outside world: the
//! session config, response dispatch, translations, and the suspension point.
//! It is threaded explicitly through every node call; nothing here lives in
//! globals or task-locals.

use super::lint::{ReentrancyFinding, ReentrancyLint};
use crate::channels::{
    buttons_payload, image_payload, list_payload, text_payload, ButtonDefinition,
    ChannelDispatch, ListSection,
};
use crate::error::FlowError;
use crate::graph::StateHandle;
use crate::localization::TranslationTable;
use crate::session::{Outbound, SessionConfig};
use crate::state_machine::Message;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Collaborators shared by every node execution of a runner
pub struct FlowServices {
    pub channel: Arc<dyn ChannelDispatch>,
    pub translations: Arc<dyn TranslationTable>,
    pub environment: HashMap<String, String>,
    pub lint: ReentrancyLint,
    /// Fail suspension points reached after side effects
    pub strict_suspension: bool,
}

impl FlowServices {
    pub fn new(channel: Arc<dyn ChannelDispatch>, translations: Arc<dyn TranslationTable>) -> Self {
        Self {
            channel,
            translations,
            environment: HashMap::new(),
            lint: ReentrancyLint::new(),
            strict_suspension: false,
        }
    }
}

impl std::fmt::Debug for FlowServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowServices")
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("strict_suspension", &self.strict_suspension)
            .finish_non_exhaustive()
    }
}

/// Everything one `invoke` or `resume` call needs besides the graph
#[derive(Debug, Clone)]
pub struct RunScope {
    config: SessionConfig,
    services: Arc<FlowServices>,
    outbound: Outbound,
    recursion_limit: u32,
}

impl RunScope {
    pub fn new(
        config: SessionConfig,
        services: Arc<FlowServices>,
        outbound: Outbound,
        recursion_limit: u32,
    ) -> Self {
        Self {
            config,
            services,
            outbound,
            recursion_limit,
        }
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Maximum node executions for this call
    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit
    }

    /// Context for one execution of `node` over `state`.
    /// `answers` are the messages delivered to its suspension points so far.
    pub(crate) fn context(
        &self,
        node: &str,
        answers: Vec<Message>,
        state: StateHandle,
    ) -> NodeContext {
        NodeContext {
            node: node.to_string(),
            config: self.config.clone(),
            services: Arc::clone(&self.services),
            outbound: self.outbound.clone(),
            state,
            answers: Arc::new(Mutex::new(Answers {
                messages: answers,
                next: 0,
            })),
            dispatches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug)]
struct Answers {
    messages: Vec<Message>,
    next: usize,
}

/// Context handed to node functions.
///
/// Cheap to clone; clones share the execution's state and counters.
#[derive(Debug, Clone)]
pub struct NodeContext {
    node: String,
    config: SessionConfig,
    services: Arc<FlowServices>,
    outbound: Outbound,
    state: StateHandle,
    answers: Arc<Mutex<Answers>>,
    dispatches: Arc<AtomicUsize>,
}

impl NodeContext {
    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn get_session_id(&self) -> Result<&str, FlowError> {
        self.config.thread_id()
    }

    pub fn get_metadata(&self) -> Map<String, Value> {
        self.config.metadata()
    }

    /// Value from the environment the runner was built with
    pub fn get_environment_variable(&self, name: &str) -> Option<&str> {
        self.services.environment.get(name).map(String::as_str)
    }

    /// Hand final values back to an embedding chatbot. Keys from repeated
    /// calls are merged.
    pub fn return_to_parent(&self, state: Map<String, Value>) {
        self.outbound.merge_parent_state(state);
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Dispatch `content` to the user, then record it in the current cycle.
    /// Nothing is recorded if dispatch fails.
    pub async fn send_response(&self, content: Value) -> Result<(), FlowError> {
        self.services
            .channel
            .send(&content, &self.config, &self.outbound)
            .await?;
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.state.save_message(Message::assistant(content));
        Ok(())
    }

    pub async fn send_text_response(&self, text: &str) -> Result<(), FlowError> {
        self.send_response(text_payload(text)).await
    }

    pub async fn send_buttons_response(
        &self,
        text: &str,
        buttons: &[ButtonDefinition],
    ) -> Result<(), FlowError> {
        self.send_response(buttons_payload(text, buttons)).await
    }

    pub async fn send_list_response(
        &self,
        text: &str,
        subtext: &str,
        sections: &[ListSection],
    ) -> Result<(), FlowError> {
        self.send_response(list_payload(text, subtext, sections)).await
    }

    pub async fn send_image_response(&self, image_url: &str) -> Result<(), FlowError> {
        self.send_response(image_payload(image_url)).await
    }

    /// Send the translation entry `key` in the user's language.
    ///
    /// Placeholders are filled from the flow variables, overridden by
    /// `substitutions`.
    pub async fn send_predefined_response(
        &self,
        key: &str,
        substitutions: Map<String, Value>,
    ) -> Result<(), FlowError> {
        let mut values = self.state.get_variables();
        values.extend(substitutions);
        let content = self.services.translations.get_localized_message(
            key,
            &self.state.get_language(),
            &values,
        )?;
        self.send_response(content).await
    }

    pub fn get_localized_constant(&self, key: &str) -> Result<String, FlowError> {
        Ok(self
            .services
            .translations
            .get_localized_constant(key, &self.state.get_language())?)
    }

    // ========================================================================
    // Suspension
    // ========================================================================

    /// Wait for the next user message and return its text.
    ///
    /// Returns [`FlowError::Interrupted`] until the answer arrives; propagate
    /// it with `?`. The node then re-executes from its start when the answer
    /// is delivered, so this should be the first statement of its node.
    ///
    /// Once answered, the message is appended to the current cycle, the
    /// per-call language override (if any) becomes the user language, and
    /// the text is stored under `variable` when one is given.
    pub fn wait_user_input(&self, variable: Option<&str>) -> Result<Option<String>, FlowError> {
        self.wait_user_input_with(variable, |text| text.map(str::to_string))
    }

    /// [`Self::wait_user_input`] with `extractor` mapping the message text to
    /// the returned and stored value
    pub fn wait_user_input_with<T, F>(
        &self,
        variable: Option<&str>,
        extractor: F,
    ) -> Result<T, FlowError>
    where
        T: Serialize,
        F: FnOnce(Option<&str>) -> T,
    {
        self.check_reentrancy()?;

        let Some(message) = self.next_answer() else {
            return Err(FlowError::Interrupted);
        };

        let value = extractor(message.text());
        let stored = match variable {
            Some(name) => Some((name.to_string(), serde_json::to_value(&value)?)),
            None => None,
        };
        let language = self.config.language().map(str::to_string);

        self.state.update_uncounted(|state| {
            if let Some(language) = language {
                state.user_language = language;
            }
            state.push_message(message);
            if let Some((name, stored)) = stored {
                state.set_variable(name, stored);
            }
        });

        Ok(value)
    }

    fn next_answer(&self) -> Option<Message> {
        let mut answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        let message = answers.messages.get(answers.next).cloned()?;
        answers.next += 1;
        Some(message)
    }

    fn check_reentrancy(&self) -> Result<(), FlowError> {
        let mutations = self.state.mutations();
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        if mutations == 0 && dispatches == 0 {
            return Ok(());
        }

        self.services.lint.record(ReentrancyFinding {
            node: self.node.clone(),
            mutations,
            dispatches,
        });

        if self.services.strict_suspension {
            return Err(FlowError::UnsafeSuspension {
                node: self.node.clone(),
                mutations,
                dispatches,
            });
        }
        Ok(())
    }
}
