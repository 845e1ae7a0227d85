use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    domain::{
        Attachment, ConversationDescriptor, ConversationId, ConversationKind, Message, MessageId,
        UserId,
    },
    identity::normalize_sender_id,
};

/// Conversation addressing carried by every socket payload. Servers fill in
/// whichever keys they know about; any of them identifies the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl ConversationScope {
    pub fn for_conversation(conversation: &ConversationDescriptor) -> Self {
        let id = Some(conversation.id.0.clone());
        match conversation.kind {
            ConversationKind::Match => Self {
                match_id: id,
                ..Self::default()
            },
            ConversationKind::Subscription => Self {
                subscription_id: id,
                ..Self::default()
            },
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        [&self.conversation_id, &self.match_id, &self.subscription_id]
            .into_iter()
            .filter_map(|key| key.as_deref())
            .filter(|key| !key.is_empty())
    }

    pub fn belongs_to(&self, conversation: &ConversationDescriptor) -> bool {
        conversation.matches_any(self.keys())
    }
}

/// Attachment metadata. Servers spell the location `path`, `uri` or `url` and
/// the type `mimeType` or `type`; every spelling is its own field so payloads
/// carrying several of them still decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FilePayload {
    pub fn location(&self) -> Option<&str> {
        first_present([&self.path, &self.uri, &self.url])
    }

    pub fn into_attachment(self) -> Option<Attachment> {
        let path = self.location()?.to_string();
        let mime_type = first_present([&self.mime_type, &self.kind])
            .unwrap_or_default()
            .to_string();
        Some(Attachment { path, mime_type })
    }
}

impl From<&Attachment> for FilePayload {
    fn from(value: &Attachment) -> Self {
        Self {
            path: Some(value.path.clone()),
            mime_type: Some(value.mime_type.clone()),
            ..Self::default()
        }
    }
}

fn first_present<const N: usize>(candidates: [&Option<String>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .filter_map(|value| value.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("message {message_id} has no recognizable sender")]
    MissingSender { message_id: String },
    #[error("message {message_id} carries no conversation key")]
    MissingConversation { message_id: String },
    #[error("message {message_id} has no timestamp")]
    MissingTimestamp { message_id: String },
    #[error("message payload is missing an id")]
    MissingId,
}

/// Message shape shared by the `receiveMessage` push and the history endpoint.
///
/// Alternate spellings (`_id`/`id`, `sender`/`senderId`,
/// `timestamp`/`createdAt`) decode into separate fields and are resolved by
/// the accessors, so documents carrying both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub scope: ConversationScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FilePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub read: bool,
}

impl MessagePayload {
    /// `_id` wins over `id`.
    pub fn message_id(&self) -> Option<&str> {
        first_present([&self.mongo_id, &self.id])
    }

    /// First of `sender`/`senderId` that normalizes to an id.
    pub fn resolved_sender(&self) -> Option<UserId> {
        [&self.sender, &self.sender_id]
            .into_iter()
            .flatten()
            .find_map(normalize_sender_id)
    }

    /// Server `timestamp`, falling back to the document's `createdAt`.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or(self.created_at)
    }

    /// Converts a confirmed server message into the domain shape. The first
    /// conversation key present becomes the message's `conversation_id`.
    pub fn into_message(self) -> Result<Message, PayloadError> {
        let message_id = self.message_id().ok_or(PayloadError::MissingId)?.to_string();
        let sender_id = self.resolved_sender().ok_or_else(|| PayloadError::MissingSender {
            message_id: message_id.clone(),
        })?;
        let conversation_id = self
            .scope
            .keys()
            .next()
            .map(ConversationId::from)
            .ok_or_else(|| PayloadError::MissingConversation {
                message_id: message_id.clone(),
            })?;
        let timestamp = self
            .sent_at()
            .ok_or_else(|| PayloadError::MissingTimestamp {
                message_id: message_id.clone(),
            })?;
        Ok(Message {
            id: MessageId(message_id),
            conversation_id,
            sender_id,
            content: self.content.unwrap_or_default(),
            attachments: self
                .file
                .and_then(FilePayload::into_attachment)
                .into_iter()
                .collect(),
            timestamp,
            pending: false,
            read: self.read,
            temp_id: self
                .temp_id
                .filter(|temp_id| !temp_id.trim().is_empty())
                .map(MessageId),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: Value,
    #[serde(flatten)]
    pub scope: ConversationScope,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    #[serde(flatten)]
    pub scope: ConversationScope,
    pub message_ids: Vec<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(MessagePayload),
    #[serde(rename = "typing")]
    Typing(TypingPayload),
    #[serde(rename = "messagesRead")]
    MessagesRead(MessagesReadPayload),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receiveMessage",
            Self::Typing(_) => "typing",
            Self::MessagesRead(_) => "messagesRead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessagePayload {
    #[serde(flatten)]
    pub scope: ConversationScope,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub temp_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FilePayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTypingPayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub is_typing: bool,
    #[serde(flatten)]
    pub scope: ConversationScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundReadPayload {
    #[serde(flatten)]
    pub scope: ConversationScope,
    pub message_ids: Vec<MessageId>,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "register")]
    Register(UserId),
    #[serde(rename = "sendMessage")]
    SendMessage(OutboundMessagePayload),
    #[serde(rename = "typing")]
    Typing(OutboundTypingPayload),
    #[serde(rename = "messagesRead")]
    MessagesRead(OutboundReadPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::SendMessage(_) => "sendMessage",
            Self::Typing(_) => "typing",
            Self::MessagesRead(_) => "messagesRead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub temp_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(default, alias = "_id")]
    pub message_id: Option<MessageId>,
    /// Server clock at persistence time, used to correct client skew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_ids: Vec<MessageId>,
}
