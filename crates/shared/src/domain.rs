use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TEMP_ID_PREFIX: &str = "temp-";

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(ConversationId);

impl UserId {
    /// Comparison for ids that may not have gone through normalization yet.
    pub fn is_same_as(&self, other: &UserId) -> bool {
        self.0.trim() == other.0.trim()
    }
}

impl MessageId {
    /// Client-generated placeholder id of the form `temp-<ts_ms>-<rand>`.
    pub fn temporary(at: DateTime<Utc>) -> Self {
        let rand = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{TEMP_ID_PREFIX}{}-{}",
            at.timestamp_millis(),
            &rand[..8]
        ))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Match,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub path: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
}

impl Message {
    pub fn is_from(&self, user_id: &UserId) -> bool {
        self.sender_id.is_same_as(user_id)
    }

    pub fn has_body(&self) -> bool {
        !self.content.trim().is_empty() || !self.attachments.is_empty()
    }
}

/// A conversation as seen from one participant: the primary key it was opened
/// with, every other key the server may address it by, and the counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDescriptor {
    pub kind: ConversationKind,
    pub id: ConversationId,
    #[serde(default)]
    pub aliases: Vec<ConversationId>,
    pub peer_id: UserId,
}

impl ConversationDescriptor {
    pub fn new(kind: ConversationKind, id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            kind,
            id: ConversationId(id.into()),
            aliases: Vec::new(),
            peer_id: UserId(peer_id.into()),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = ConversationId(alias.into());
        if alias != self.id && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn matches(&self, key: &str) -> bool {
        self.id.as_str() == key || self.aliases.iter().any(|alias| alias.as_str() == key)
    }

    pub fn matches_any<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        keys.into_iter().any(|key| self.matches(key))
    }
}
