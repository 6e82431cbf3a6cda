use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::http::{build_client, checked_url};
use crate::collaborators::{ReplyAck, ReplyTrigger};

pub(crate) const DEFAULT_BOT_RESPONSE: &str = "I received your message!";

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    chat_id: &'a str,
    content: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyResponse {
    success: Option<bool>,
    #[serde(rename = "botResponse")]
    bot_response: Option<String>,
    response: Option<String>,
    error: Option<String>,
}

// Automation workflows answer with either one object or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplyBody {
    Many(Vec<ReplyResponse>),
    One(ReplyResponse),
}

impl ReplyBody {
    fn into_first(self) -> ReplyResponse {
        match self {
            ReplyBody::Many(items) => items.into_iter().next().unwrap_or_default(),
            ReplyBody::One(item) => item,
        }
    }
}

/// Asks the automation webhook for a bot reply. The reply row itself arrives on the live
/// feed; the webhook answer only acknowledges the request.
#[derive(Debug, Clone)]
pub struct WebhookReplyTrigger {
    client: reqwest::Client,
    url: String,
}

impl WebhookReplyTrigger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: checked_url(url, "reply webhook")?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReplyTrigger for WebhookReplyTrigger {
    async fn notify(
        &self,
        chat_id: &str,
        content: &str,
        user_id: &str,
    ) -> anyhow::Result<ReplyAck> {
        let content = content.trim();
        if user_id.trim().is_empty() {
            anyhow::bail!("user id is required");
        }
        if content.is_empty() {
            anyhow::bail!("content is required");
        }

        let resp = self
            .client
            .post(&self.url)
            .json(&ReplyRequest {
                chat_id,
                content,
                user_id,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .send()
            .await
            .context("send reply webhook request")?;

        let status = resp.status();
        let body = resp.text().await.context("read reply webhook response")?;
        if !status.is_success() {
            anyhow::bail!("reply webhook failed: {status}");
        }

        let reply = if body.trim().is_empty() {
            ReplyResponse::default()
        } else {
            serde_json::from_str::<ReplyBody>(&body)
                .context("decode reply webhook response")?
                .into_first()
        };
        if let Some(error) = reply.error.as_deref().filter(|e| !e.is_empty()) {
            tracing::warn!(%chat_id, %error, "reply webhook reported an error");
        }

        Ok(ReplyAck {
            success: reply.success.unwrap_or(true),
            bot_response: Some(
                reply
                    .bot_response
                    .or(reply.response)
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| DEFAULT_BOT_RESPONSE.to_string()),
            ),
        })
    }
}
