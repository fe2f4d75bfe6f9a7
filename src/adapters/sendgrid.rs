//! SendGrid v3 email adapter

use super::error::check_status;
use super::{http_client, AdapterError, EmailAdapter};
use crate::error::Result;
use crate::types::EmailRequest;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    /// Falls back to `SENDGRID_API_KEY`
    #[serde(default)]
    pub api_key: Option<SecretString>,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct SendGridAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    from_address: String,
    from_name: Option<String>,
}

impl SendGridAdapter {
    pub fn new(
        api_key: SecretString,
        from_address: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            from_address: from_address.into(),
            from_name: None,
        })
    }

    pub fn from_config(config: &SendGridConfig, timeout: Duration) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            crate::error::IntegrationError::Config("sendgrid.api_key is not set".to_string())
        })?;
        let mut adapter = Self::new(
            api_key,
            config.from_address.clone(),
            config.base_url.clone(),
            timeout,
        )?;
        adapter.from_name = config.from_name.clone();
        Ok(adapter)
    }

    fn payload(&self, request: &EmailRequest) -> Value {
        let mut from = json!({ "email": request.from.as_deref().unwrap_or(&self.from_address) });
        if let Some(name) = &self.from_name {
            from["name"] = json!(name);
        }

        // text/plain must precede text/html
        let mut content = Vec::new();
        if !request.body.is_empty() {
            content.push(json!({ "type": "text/plain", "value": request.body }));
        }
        if let Some(html) = &request.html_body {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        let mut payload = json!({
            "personalizations": [{ "to": [{ "email": request.to }] }],
            "from": from,
            "subject": request.subject,
            "content": content,
        });

        if !request.attachments.is_empty() {
            payload["attachments"] = request
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "content": STANDARD.encode(&a.content),
                        "filename": a.filename,
                        "type": a.content_type,
                        "disposition": "attachment",
                    })
                })
                .collect();
        }

        payload
    }
}

#[async_trait]
impl EmailAdapter for SendGridAdapter {
    fn provider(&self) -> &str {
        "sendgrid"
    }

    async fn send(&self, request: &EmailRequest) -> std::result::Result<String, AdapterError> {
        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.payload(request))
            .send()
            .await?;
        let response = check_status(response).await?;

        // Accepted mail is not resent elsewhere, so a missing id gets a local one
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                debug!("SendGrid response carried no X-Message-Id");
                format!("sendgrid-{}", uuid::Uuid::new_v4())
            });

        Ok(message_id)
    }

    async fn ping(&self) -> std::result::Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/v3/scopes", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
