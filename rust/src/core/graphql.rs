use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::http::{build_client, checked_url, decode_response};
use crate::collaborators::MessageStore;
use crate::message::Message;

const INSERT_USER_MESSAGE: &str = r#"mutation InsertUserMessage($chatId: uuid!, $content: String!) {
  insert_messages_one(object: { chat_id: $chatId, content: $content, sender: "user" }) {
    id
    chat_id
    content
    sender
    created_at
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct InsertUserMessageData {
    insert_messages_one: Option<Message>,
}

/// Persists user messages through the Hasura `insert_messages_one` mutation.
#[derive(Debug, Clone)]
pub struct GraphqlMessageStore {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl GraphqlMessageStore {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: checked_url(endpoint, "graphql")?,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl MessageStore for GraphqlMessageStore {
    async fn append(&self, chat_id: &str, content: &str) -> anyhow::Result<Message> {
        let body = json!({
            "query": INSERT_USER_MESSAGE,
            "variables": { "chatId": chat_id, "content": content },
        });
        let resp = self
            .request(self.client.post(&self.endpoint))
            .json(&body)
            .send()
            .await
            .context("send insert message request")?;
        let decoded: GraphqlResponse<InsertUserMessageData> =
            decode_response(resp, "insert message").await?;

        if !decoded.errors.is_empty() {
            let messages: Vec<&str> = decoded.errors.iter().map(|e| e.message.as_str()).collect();
            anyhow::bail!("insert message failed: {}", messages.join("; "));
        }
        decoded
            .data
            .and_then(|d| d.insert_messages_one)
            .context("insert message returned no row")
    }
}
