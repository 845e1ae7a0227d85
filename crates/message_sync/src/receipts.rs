use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use shared::domain::{Message, MessageId};
use tokio::time::Instant;

use crate::store::MessageStore;

/// The one self-sent message that should carry the "seen" indicator: the
/// latest of my messages the recipient has read.
pub fn seen_message_id(
    messages: &[Message],
    is_mine: impl Fn(&Message) -> bool,
) -> Option<MessageId> {
    messages
        .iter()
        .rev()
        .find(|m| m.read && is_mine(m))
        .map(|m| m.id.clone())
}

#[derive(Debug, Clone)]
pub struct ReadReceiptTracker {
    scrolled_to_bottom: bool,
    debounce: Duration,
    recently_emitted: HashMap<MessageId, Instant>,
    last_read_timestamp: Option<DateTime<Utc>>,
}

impl ReadReceiptTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            scrolled_to_bottom: false,
            debounce,
            recently_emitted: HashMap::new(),
            last_read_timestamp: None,
        }
    }

    pub fn scrolled_to_bottom(&self) -> bool {
        self.scrolled_to_bottom
    }

    /// Returns `true` when the view just reached the bottom.
    pub fn set_scrolled_to_bottom(&mut self, at_bottom: bool) -> bool {
        let reached = at_bottom && !self.scrolled_to_bottom;
        self.scrolled_to_bottom = at_bottom;
        reached
    }

    pub fn last_read_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_read_timestamp
    }

    /// Marks the visible incoming messages read in the store and returns the
    /// ids that should be announced. Does nothing unless the view is at the
    /// bottom.
    pub fn mark_visible(
        &mut self,
        store: &mut MessageStore,
        candidates: &[MessageId],
        is_incoming: impl Fn(&Message) -> bool,
        now: Instant,
    ) -> Vec<MessageId> {
        if !self.scrolled_to_bottom || candidates.is_empty() {
            return Vec::new();
        }

        let debounce = self.debounce;
        self.recently_emitted
            .retain(|_, emitted_at| now.saturating_duration_since(*emitted_at) < debounce);

        let recent = &self.recently_emitted;
        let eligible: Vec<MessageId> = candidates
            .iter()
            .filter(|id| !recent.contains_key(*id))
            .cloned()
            .collect();
        let flipped = store.mark_read(&eligible, |m| is_incoming(m));

        for id in &flipped {
            self.recently_emitted.insert(id.clone(), now);
            if let Some(message) = store.get(id) {
                self.advance_last_read(message.timestamp);
            }
        }
        flipped
    }

    /// Every unread incoming message, for the moment the view reaches the bottom.
    pub fn unread_incoming(
        store: &MessageStore,
        is_incoming: impl Fn(&Message) -> bool,
    ) -> Vec<MessageId> {
        store
            .messages()
            .iter()
            .filter(|m| !m.read && !m.pending && is_incoming(m))
            .map(|m| m.id.clone())
            .collect()
    }

    /// The other side read some of my messages.
    pub fn apply_remote_read(
        store: &mut MessageStore,
        ids: &[MessageId],
        is_mine: impl Fn(&Message) -> bool,
    ) -> Vec<MessageId> {
        store.mark_read(ids, is_mine)
    }

    fn advance_last_read(&mut self, timestamp: DateTime<Utc>) {
        if self.last_read_timestamp.map_or(true, |last| timestamp > last) {
            self.last_read_timestamp = Some(timestamp);
        }
    }
}

#[cfg(test)]
#[path = "tests/receipts_tests.rs"]
mod tests;
