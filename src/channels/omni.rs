//! Omni-channel dispatcher
//!
//! Routes outbound payloads by the session's channel key: console output for
//! local runs, synchronous or callback delivery for the HTTP channel, and the
//! Messages API for everything else.

use super::{ChannelDispatch, CONSOLE, HTTP};
use crate::rest::{RequestError, RetryPolicy, RetryingClient};
use crate::session::{
    Outbound, SessionConfig, BUSINESS_NUMBER, CALLBACK_URL, END_USER_NUMBER, FLOW_ID,
    MESSAGE_ID, THREAD_ID, USER_ID,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api2.infobip.net";
const MESSAGES_PATH: &str = "/messages-api/1/messages";
/// Callback receivers answer quickly or not at all
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials and endpoint of the messaging platform
#[derive(Clone, Default)]
pub struct ChannelApiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ChannelApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelApiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChannelApiConfig {
    /// Load from `OMNI_API_KEY` and `OMNI_BASE_URL`
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let var = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            api_key: var("OMNI_API_KEY"),
            base_url: var("OMNI_BASE_URL"),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn messages_url(&self) -> String {
        format!("{}{MESSAGES_PATH}", self.base_url())
    }

    pub(crate) fn authorization(&self) -> String {
        format!("App {}", self.api_key.as_deref().unwrap_or_default())
    }
}

/// Default [`ChannelDispatch`] implementation
#[derive(Debug, Clone)]
pub struct OmniChannelDispatcher {
    api: ChannelApiConfig,
    client: RetryingClient,
    callback_client: RetryingClient,
}

impl OmniChannelDispatcher {
    pub fn new(api: ChannelApiConfig) -> Result<Self, RequestError> {
        let policy = RetryPolicy::default();
        Ok(Self {
            api,
            client: RetryingClient::new(policy)?,
            callback_client: RetryingClient::new(RetryPolicy {
                timeout: CALLBACK_TIMEOUT,
                ..policy
            })?,
        })
    }

    pub fn from_env() -> Result<Self, RequestError> {
        Self::new(ChannelApiConfig::from_env())
    }

    pub fn api(&self) -> &ChannelApiConfig {
        &self.api
    }

    pub(crate) fn client(&self) -> &RetryingClient {
        &self.client
    }

    async fn send_callback(
        &self,
        url: &str,
        content: &Value,
        config: &SessionConfig,
    ) -> Result<(), RequestError> {
        let headers: Vec<(&str, String)> = [
            ("session-id", THREAD_ID),
            ("message-id", MESSAGE_ID),
            ("user-id", USER_ID),
            ("flow-id", FLOW_ID),
        ]
        .into_iter()
        .map(|(header, key)| (header, config.get_str(key).unwrap_or_default().to_string()))
        .collect();

        self.callback_client
            .post_json(config, url, content, &headers)
            .await?;
        Ok(())
    }

    async fn send_messages(
        &self,
        channel: &str,
        content: &Value,
        config: &SessionConfig,
    ) -> Result<(), RequestError> {
        let body = messages_body(channel, content, config);
        let headers = [
            ("Authorization", self.api.authorization()),
            ("Accept", "application/json".to_string()),
        ];
        self.client
            .post_json(config, &self.api.messages_url(), &body, &headers)
            .await?;
        Ok(())
    }
}

/// Messages API request body for a single outbound message
pub fn messages_body(channel: &str, content: &Value, config: &SessionConfig) -> Value {
    json!({
        "messages": [{
            "channel": channel,
            "sender": config.get(BUSINESS_NUMBER),
            "destinations": [{"to": config.get(END_USER_NUMBER)}],
            "content": content,
        }]
    })
}

#[async_trait]
impl ChannelDispatch for OmniChannelDispatcher {
    async fn send(
        &self,
        content: &Value,
        config: &SessionConfig,
        outbound: &Outbound,
    ) -> Result<(), RequestError> {
        match config.channel() {
            Some(CONSOLE) | None => {
                tracing::info!(
                    details = %config.log_details(),
                    content = %content,
                    "Sending content to console"
                );
                Ok(())
            }
            Some(HTTP) => match config.get_str(CALLBACK_URL) {
                Some(url) => self.send_callback(url, content, config).await,
                None => {
                    outbound.push_response(content.clone());
                    Ok(())
                }
            },
            Some(channel) => self.send_messages(channel, content, config).await,
        }
    }
}
