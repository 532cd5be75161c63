//! Mock implementations for testing
//!
//! These mocks let flows run end to end without network I/O.

use crate::channels::ChannelDispatch;
use crate::flow::{FlowServices, NodeContext, RunScope};
use crate::graph::StateHandle;
use crate::localization::StaticTranslationTable;
use crate::rest::RequestError;
use crate::session::{Outbound, SessionConfig};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock channel
// ============================================================================

/// Channel that records every payload it is asked to send
#[derive(Debug, Default)]
pub struct RecordingChannel {
    /// Payloads in send order
    pub sent: Mutex<Vec<Value>>,
    failures: Mutex<VecDeque<RequestError>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `error`
    pub fn queue_failure(&self, error: RequestError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Text of every sent text payload
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|c| c["body"]["text"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ChannelDispatch for RecordingChannel {
    async fn send(
        &self,
        content: &Value,
        _config: &SessionConfig,
        outbound: &Outbound,
    ) -> Result<(), RequestError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(content.clone());
        outbound.push_response(content.clone());
        Ok(())
    }
}

// ============================================================================
// Scopes and contexts
// ============================================================================

pub fn services(channel: Arc<RecordingChannel>) -> FlowServices {
    FlowServices::new(channel, Arc::new(StaticTranslationTable::default()))
}

/// Run scope for `thread_id` over a recording channel
pub fn scope(thread_id: &str) -> RunScope {
    RunScope::new(
        SessionConfig::new(thread_id),
        Arc::new(services(Arc::new(RecordingChannel::new()))),
        Outbound::new(),
        crate::config::DEFAULT_RECURSION_LIMIT,
    )
}

/// Context factory for calling a node outside the engine
pub fn context_factory(node: &str) -> impl FnOnce(StateHandle) -> NodeContext + '_ {
    move |handle| scope("test").context(node, Vec::new(), handle)
}
