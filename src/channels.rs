//! Outbound channel delivery
//!
//! Payload builders produce Messages API content; a [`ChannelDispatch`]
//! delivers it to wherever the session came from.

pub mod omni;
pub mod whatsapp;

pub use omni::{ChannelApiConfig, OmniChannelDispatcher};
pub use whatsapp::{escape_placeholders, WhatsAppTemplate};

use crate::rest::RequestError;
use crate::session::{Outbound, SessionConfig};
use crate::state_machine::state::{BODY, POSTBACK_DATA, TEXT, TEXT_TYPE, TYPE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Local development channel; payloads are only logged
pub const CONSOLE: &str = "CONSOLE";
/// HTTP API channel; synchronous unless the session carries a callback URL
pub const HTTP: &str = "HTTP";

pub const LIST_TYPE: &str = "LIST";
pub const IMAGE_TYPE: &str = "IMAGE";
pub const REPLY_BUTTON: &str = "REPLY";

/// Delivers channel-formatted payloads
#[async_trait]
pub trait ChannelDispatch: Send + Sync {
    /// Send `content` on the channel the session arrived on.
    ///
    /// Synchronous channels push into `outbound` instead of calling out.
    async fn send(
        &self,
        content: &Value,
        config: &SessionConfig,
        outbound: &Outbound,
    ) -> Result<(), RequestError>;
}

#[async_trait]
impl<T: ChannelDispatch + ?Sized> ChannelDispatch for Arc<T> {
    async fn send(
        &self,
        content: &Value,
        config: &SessionConfig,
        outbound: &Outbound,
    ) -> Result<(), RequestError> {
        (**self).send(content, config, outbound).await
    }
}

// ============================================================================
// Payload builders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(rename = "postbackData")]
    pub postback_data: String,
}

impl ButtonDefinition {
    /// Quick reply button
    pub fn reply(text: impl Into<String>, postback_data: impl Into<String>) -> Self {
        Self {
            kind: REPLY_BUTTON.to_string(),
            text: text.into(),
            postback_data: postback_data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ListItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    #[serde(rename = "sectionTitle")]
    pub title: String,
    pub items: Vec<ListItem>,
}

impl ListSection {
    pub fn new(title: impl Into<String>, items: Vec<ListItem>) -> Self {
        Self {
            title: title.into(),
            items,
        }
    }
}

pub fn text_payload(text: &str) -> Value {
    json!({ BODY: { TYPE: TEXT_TYPE, TEXT: text } })
}

pub fn buttons_payload(text: &str, buttons: &[ButtonDefinition]) -> Value {
    let buttons: Vec<Value> = buttons
        .iter()
        .map(|b| json!({ TYPE: b.kind, TEXT: b.text, POSTBACK_DATA: b.postback_data }))
        .collect();
    json!({
        BODY: { TYPE: TEXT_TYPE, TEXT: text },
        "buttons": buttons,
    })
}

/// List picker; `subtext` is shown inside the picker
pub fn list_payload(text: &str, subtext: &str, sections: &[ListSection]) -> Value {
    json!({
        BODY: {
            TYPE: LIST_TYPE,
            TEXT: text,
            "subtext": subtext,
            "sections": sections,
        }
    })
}

pub fn image_payload(url: &str) -> Value {
    json!({ BODY: { TYPE: IMAGE_TYPE, "url": url } })
}
