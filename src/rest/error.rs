//! HTTP collaborator error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One failed attempt of a retried request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl FailedAttempt {
    pub fn transport(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status_code: None,
        }
    }

    pub fn status(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            error: body.into(),
            status_code: Some(status_code),
        }
    }
}

/// Failure of a downstream HTTP call
#[derive(Debug, Error)]
pub enum RequestError {
    /// 4xx from the downstream service - the request itself is wrong, never retried
    #[error("Request rejected with status {code}: {message}")]
    UserRequest { code: u16, message: String },

    /// Downstream service kept failing until retries ran out
    #[error("{message}")]
    Application {
        code: u16,
        message: String,
        trace: Vec<FailedAttempt>,
    },

    /// Response arrived but its body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn user_request(code: u16, message: impl Into<String>) -> Self {
        Self::UserRequest {
            code,
            message: message.into(),
        }
    }

    pub fn application(code: u16, message: impl Into<String>, trace: Vec<FailedAttempt>) -> Self {
        Self::Application {
            code,
            message: message.into(),
            trace,
        }
    }

    /// HTTP-style status code describing the failure
    pub fn code(&self) -> u16 {
        match self {
            Self::UserRequest { code, .. } | Self::Application { code, .. } => *code,
            Self::Decode(_) => 500,
        }
    }

    /// Failed attempts that led to this error, empty for non-retried failures
    pub fn trace(&self) -> &[FailedAttempt] {
        match self {
            Self::Application { trace, .. } => trace,
            _ => &[],
        }
    }
}
