//! AI reply collaborator.
//!
//! The widget asks a [`ReplyGenerator`] for the next bot turn. The HTTP
//! implementation posts `{history, productId}` and expects
//! `{reply, suggestSwitchProduct}` back.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ReplyConfig;
use crate::error::{Error, Result};
use crate::models::{Message, MessageRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub history: Vec<HistoryTurn>,
    pub product_id: Option<String>,
}

impl ReplyRequest {
    /// Build a request from the conversation so far. System notices are
    /// local UI text and are not sent.
    pub fn from_log(messages: &[Message], product_id: Option<&str>) -> Self {
        let history = messages
            .iter()
            .filter(|msg| msg.role != MessageRole::System)
            .map(|msg| HistoryTurn {
                role: msg.role,
                content: msg.content.clone(),
            })
            .collect();
        Self {
            history,
            product_id: product_id.map(ToOwned::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyResponse {
    pub reply: String,
    #[serde(default)]
    pub suggest_switch_product: bool,
}

/// Produces the next assistant turn.
pub trait ReplyGenerator: Send + Sync {
    fn generate(&self, request: &ReplyRequest) -> impl Future<Output = Result<ReplyResponse>> + Send;
}

/// Reply generator backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpReplyGenerator {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpReplyGenerator {
    pub fn from_config(config: &ReplyConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build reply client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(&self, request: &ReplyRequest) -> Result<ReplyResponse> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(Error::Reply("no reply endpoint configured".to_string()));
        };

        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Reply(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Reply(format!("endpoint returned {status}: {body}")));
        }

        let reply: ReplyResponse = response
            .json()
            .await
            .map_err(|e| Error::Reply(format!("malformed reply: {e}")))?;
        tracing::debug!(
            turns = request.history.len(),
            suggest_switch = reply.suggest_switch_product,
            "received reply"
        );
        Ok(reply)
    }
}
