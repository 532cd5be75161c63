//! Crate-wide error type

use crate::config::ConfigError;
use crate::graph::CompileError;
use crate::localization::LocalizationError;
use crate::rest::RequestError;
use thiserror::Error;

/// Errors surfaced by flow construction and execution.
///
/// Errors returned by node functions travel through the engine untouched, so
/// a node can return any variant (usually [`FlowError::Request`] or
/// [`FlowError::Other`]) and the caller of [`crate::FlowRunner::run`] sees it
/// as-is.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Graph compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Session config is missing required key '{0}'")]
    MissingConfigKey(&'static str),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Localization failed: {0}")]
    Localization(#[from] LocalizationError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    RecursionLimit { limit: u32 },

    #[error("Node '{from}' routed to unknown node '{target}'")]
    UnknownNode { from: String, target: String },

    #[error("Session '{0}' has no suspended node to resume")]
    NothingToResume(String),

    /// Suspension signal raised by `wait_user_input`.
    ///
    /// Must be propagated with `?`; the engine turns it into a durable
    /// "awaiting input" checkpoint. Swallowing it inside a node leaves the
    /// node running without the user's answer.
    #[error("Node is waiting for user input")]
    Interrupted,

    #[error(
        "Node '{node}' waits for user input after {mutations} state mutation(s) and {dispatches} dispatched response(s); this code re-runs on resume"
    )]
    UnsafeSuspension {
        node: String,
        mutations: usize,
        dispatches: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FlowError {
    /// Wrap an arbitrary node-level failure
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
