//! Per-invocation session context
//!
//! [`SessionConfig`] is the opaque key/value context the channel layer hands
//! to every `run` call. [`Outbound`] collects what a single `run` produces for
//! the caller: synchronous HTTP responses and the state handed back to an
//! embedding chatbot.

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Well-known keys
// ============================================================================

pub const THREAD_ID: &str = "thread_id";
pub const CHANNEL: &str = "channel";
pub const LANGUAGE: &str = "language";
pub const RECURSION_LIMIT: &str = "recursion_limit";
pub const METADATA: &str = "metadata";
pub const CALLBACK_URL: &str = "callback_url";
pub const MESSAGE_ID: &str = "message_id";
pub const USER_ID: &str = "user_id";
pub const FLOW_ID: &str = "flow_id";
pub const BUSINESS_NUMBER: &str = "business_number";
pub const END_USER_NUMBER: &str = "end_user_number";
pub const CHANNEL_ID: &str = "chid";

/// Session and channel details for one `run` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig {
    values: Map<String, Value>,
}

impl SessionConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self::default().with(THREAD_ID, thread_id.into())
    }

    /// Wrap an existing key/value map as delivered by the channel layer
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_channel(self, channel: impl Into<String>) -> Self {
        self.with(CHANNEL, channel.into())
    }

    #[must_use]
    pub fn with_language(self, language: impl Into<String>) -> Self {
        self.with(LANGUAGE, language.into())
    }

    #[must_use]
    pub fn with_recursion_limit(self, limit: u32) -> Self {
        self.with(RECURSION_LIMIT, limit)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Session identifier; every `run` call needs one
    pub fn thread_id(&self) -> Result<&str, FlowError> {
        self.get_str(THREAD_ID)
            .ok_or(FlowError::MissingConfigKey(THREAD_ID))
    }

    pub fn channel(&self) -> Option<&str> {
        self.get_str(CHANNEL)
    }

    /// Per-call language override
    pub fn language(&self) -> Option<&str> {
        self.get_str(LANGUAGE)
    }

    pub fn recursion_limit(&self) -> Option<u32> {
        self.get(RECURSION_LIMIT)
            .and_then(Value::as_u64)
            .and_then(|limit| u32::try_from(limit).ok())
    }

    /// Caller supplied metadata, empty when absent
    pub fn metadata(&self) -> Map<String, Value> {
        self.get(METADATA)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Short description of the session for log lines
    pub fn log_details(&self) -> String {
        format!(
            "chid: {} session-id: {} channel: {}",
            self.get_str(CHANNEL_ID).unwrap_or("-"),
            self.get_str(THREAD_ID).unwrap_or("-"),
            self.channel().unwrap_or("-"),
        )
    }
}

// ============================================================================
// Outbound accumulator
// ============================================================================

#[derive(Debug, Default)]
struct OutboundBuffer {
    responses: Vec<Value>,
    parent_state: Map<String, Value>,
}

/// Collects the results of one `run` call.
///
/// Cheap to clone; clones share the same buffer. A fresh accumulator is
/// created for every `run` call.
#[derive(Debug, Clone, Default)]
pub struct Outbound {
    inner: Arc<Mutex<OutboundBuffer>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OutboundBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a response for synchronous delivery to the caller
    pub fn push_response(&self, content: Value) {
        self.lock().responses.push(content);
    }

    /// Responses in the order they were produced
    pub fn responses(&self) -> Vec<Value> {
        self.lock().responses.clone()
    }

    /// Merge keys into the state handed back to an embedding chatbot
    pub fn merge_parent_state(&self, state: Map<String, Value>) {
        self.lock().parent_state.extend(state);
    }

    pub fn parent_state(&self) -> Map<String, Value> {
        self.lock().parent_state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_thread_id_required() {
        let config = SessionConfig::default();
        assert!(matches!(
            config.thread_id(),
            Err(FlowError::MissingConfigKey(THREAD_ID))
        ));
        assert_eq!(SessionConfig::new("123").thread_id().unwrap(), "123");
    }

    #[test]
    fn test_well_known_keys() {
        let config = SessionConfig::new("s1")
            .with_channel("HTTP")
            .with_language("de")
            .with_recursion_limit(7)
            .with(METADATA, json!({"tenant": "acme"}));

        assert_eq!(config.channel(), Some("HTTP"));
        assert_eq!(config.language(), Some("de"));
        assert_eq!(config.recursion_limit(), Some(7));
        assert_eq!(config.metadata().get("tenant"), Some(&json!("acme")));
    }

    #[test]
    fn test_metadata_defaults_to_empty() {
        assert!(SessionConfig::new("s1").metadata().is_empty());
    }

    #[test]
    fn test_deserializes_from_flat_map() {
        let config: SessionConfig =
            serde_json::from_value(json!({"thread_id": "abc", "channel": "CONSOLE"})).unwrap();
        assert_eq!(config.thread_id().unwrap(), "abc");
        assert_eq!(config.channel(), Some("CONSOLE"));
    }

    #[test]
    fn test_outbound_clones_share_buffer() {
        let outbound = Outbound::new();
        let clone = outbound.clone();
        clone.push_response(json!({"body": {"type": "TEXT", "text": "hi"}}));

        let mut first = Map::new();
        first.insert("a".into(), json!(1));
        outbound.merge_parent_state(first);
        let mut second = Map::new();
        second.insert("b".into(), json!(2));
        clone.merge_parent_state(second);

        assert_eq!(outbound.responses().len(), 1);
        assert_eq!(outbound.parent_state().len(), 2);
    }
}
