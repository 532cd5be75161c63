//! WhatsApp template messages
//!
//! Business-initiated WhatsApp conversations must start from an approved
//! template. Templates go through a dedicated endpoint, not the Messages API.

use super::omni::OmniChannelDispatcher;
use crate::rest::RequestError;
use crate::session::{SessionConfig, LANGUAGE};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

const TEMPLATE_PATH: &str = "/whatsapp/1/message/template";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppTemplate {
    pub phone_number: String,
    pub template_name: String,
    pub placeholders: Vec<String>,
}

impl WhatsAppTemplate {
    pub fn new(
        phone_number: impl Into<String>,
        template_name: impl Into<String>,
        placeholders: Vec<String>,
    ) -> Self {
        Self {
            phone_number: phone_number.into(),
            template_name: template_name.into(),
            placeholders,
        }
    }

    /// Template API payload sent from `sender`
    pub fn payload(&self, sender: &str, config: &SessionConfig) -> Value {
        json!({
            "from": sender,
            "to": self.phone_number,
            "content": {
                "templateName": self.template_name,
                "templateData": {
                    "body": {"placeholders": escape_placeholders(&self.placeholders)}
                },
                "language": config.get(LANGUAGE),
            }
        })
    }
}

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{4,}").expect("valid whitespace pattern"));

/// Make placeholders acceptable to WhatsApp: newlines escaped, tabs turned
/// into spaces, runs of four or more whitespace characters collapsed.
pub fn escape_placeholders(placeholders: &[String]) -> Vec<String> {
    placeholders
        .iter()
        .map(|p| {
            let p = p.replace('\n', "\\n").replace('\t', " ");
            WHITESPACE_RUN.replace_all(&p, " ").into_owned()
        })
        .collect()
}

impl OmniChannelDispatcher {
    /// Send one template message
    pub async fn send_whatsapp_template(
        &self,
        config: &SessionConfig,
        template: &WhatsAppTemplate,
        sender: &str,
    ) -> Result<(), RequestError> {
        self.send_whatsapp_templates(config, std::slice::from_ref(template), sender)
            .await
    }

    /// Send templates to many receivers in a single request
    pub async fn send_whatsapp_templates(
        &self,
        config: &SessionConfig,
        templates: &[WhatsAppTemplate],
        sender: &str,
    ) -> Result<(), RequestError> {
        let messages: Vec<Value> = templates
            .iter()
            .map(|t| t.payload(sender, config))
            .collect();
        let url = format!("{}{TEMPLATE_PATH}", self.api().base_url());
        let headers = [("Authorization", self.api().authorization())];

        tracing::info!(
            count = messages.len(),
            details = %config.log_details(),
            "Sending WhatsApp templates"
        );
        self.client()
            .post_json(config, &url, &json!({ "messages": messages }), &headers)
            .await?;
        Ok(())
    }
}
