use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use shared::{
    domain::{ConversationId, MessageId},
    error::ApiError,
    protocol::{MarkReadRequest, MessagePayload, SendMessageRequest, SendMessageResponse},
};
use tracing::debug;
use url::Url;

/// Durable REST side of the conversation.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<MessagePayload>>;
    async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse>;
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<()>;
}

pub struct MissingPersistenceApi;

#[async_trait]
impl PersistenceApi for MissingPersistenceApi {
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<MessagePayload>> {
        Err(anyhow!(
            "persistence api unavailable for conversation {conversation_id}"
        ))
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse> {
        Err(anyhow!(
            "persistence api unavailable for conversation {}",
            request.conversation_id
        ))
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        _message_ids: &[MessageId],
    ) -> Result<()> {
        Err(anyhow!(
            "persistence api unavailable for conversation {conversation_id}"
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    Bare(Vec<MessagePayload>),
    Wrapped { messages: Vec<MessagePayload> },
}

pub struct HttpPersistenceApi {
    http: Client,
    base_url: Url,
}

impl HttpPersistenceApi {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let base_url = Url::parse(server_url)
            .with_context(|| format!("invalid persistence server url: {server_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("persistence server url cannot be a base: {server_url}"));
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let api_error = ApiError::from_body(status.as_u16(), &body);
    Err(anyhow::Error::new(api_error).context(format!("{url} returned {status}")))
}

#[async_trait]
impl PersistenceApi for HttpPersistenceApi {
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<MessagePayload>> {
        let url = self.endpoint(&["conversations", conversation_id.as_str(), "messages"]);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch history for {conversation_id}"))?;
        let history: HistoryResponse = ensure_success(response).await?.json().await?;
        let messages = match history {
            HistoryResponse::Bare(messages) | HistoryResponse::Wrapped { messages } => messages,
        };
        debug!(
            conversation_id = %conversation_id,
            count = messages.len(),
            "persistence: fetched history"
        );
        Ok(messages)
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse> {
        let url = self.endpoint(&["messages"]);
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to send message {}", request.temp_id))?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
    ) -> Result<()> {
        let url = self.endpoint(&["conversations", conversation_id.as_str(), "read"]);
        let response = self
            .http
            .post(url)
            .json(&MarkReadRequest {
                message_ids: message_ids.to_vec(),
            })
            .send()
            .await
            .with_context(|| format!("failed to mark messages read in {conversation_id}"))?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/persistence_tests.rs"]
mod tests;
