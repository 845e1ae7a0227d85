use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::domain::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Inserted,
    /// A pending optimistic entry was swapped for its confirmed counterpart.
    Replaced { previous_id: MessageId },
    Duplicate,
}

impl MergeResult {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Ordered, deduplicated messages of a single conversation.
///
/// Two representations are the same logical message when their confirmed ids
/// match, or when a pending entry and a confirmed one share sender and content
/// and their timestamps fall within the skew window.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    confirmed_ids: HashSet<MessageId>,
    replaced_temp_ids: HashMap<MessageId, MessageId>,
    /// Temp ids paired with a confirmed id by the sender/content heuristic
    /// rather than an echoed `temp_id`. Such pairings may be undone.
    guessed_temp_ids: HashSet<MessageId>,
    skew_window_ms: i64,
}

impl MessageStore {
    pub fn new(skew_window: Duration) -> Self {
        Self {
            messages: Vec::new(),
            confirmed_ids: HashSet::new(),
            replaced_temp_ids: HashMap::new(),
            guessed_temp_ids: HashSet::new(),
            skew_window_ms: i64::try_from(skew_window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.get(id).is_some_and(|m| m.pending)
    }

    /// Server id that replaced the given temporary id, if it was confirmed.
    pub fn confirmed_id_for(&self, temp_id: &MessageId) -> Option<&MessageId> {
        self.replaced_temp_ids.get(temp_id)
    }

    /// Like [`Self::confirmed_id_for`], but only for pairings backed by an
    /// echoed `temp_id`.
    pub fn acknowledged_id_for(&self, temp_id: &MessageId) -> Option<&MessageId> {
        if self.guessed_temp_ids.contains(temp_id) {
            return None;
        }
        self.replaced_temp_ids.get(temp_id)
    }

    pub fn upsert(&mut self, incoming: Message) -> MergeResult {
        if !incoming.pending && !incoming.id.is_temporary() {
            if let Some(temp_id) = incoming.temp_id.clone() {
                if let Some(result) = self.apply_acknowledgment(&temp_id, &incoming) {
                    return result;
                }
            }
        }

        if self.is_known(&incoming) {
            return MergeResult::Duplicate;
        }

        if !incoming.pending {
            if let Some(idx) = self.find_pending_counterpart(&incoming) {
                let guessed = incoming.temp_id.as_ref() != Some(&self.messages[idx].id);
                return self.replace_pending(idx, incoming, guessed);
            }
        }

        self.insert_ordered(incoming);
        MergeResult::Inserted
    }

    /// Drops a still-pending optimistic entry. Confirmed messages are never
    /// removed individually.
    pub fn remove_pending(&mut self, temp_id: &MessageId) -> bool {
        let Some(idx) = self
            .messages
            .iter()
            .position(|m| m.pending && m.id == *temp_id)
        else {
            return false;
        };
        self.messages.remove(idx);
        true
    }

    /// Flips `read` on the listed messages accepted by `filter` and returns the
    /// ids that actually changed.
    pub fn mark_read(
        &mut self,
        ids: &[MessageId],
        filter: impl Fn(&Message) -> bool,
    ) -> Vec<MessageId> {
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let mut flipped = Vec::new();
        for message in &mut self.messages {
            if message.read || !wanted.contains(&message.id) || !filter(message) {
                continue;
            }
            message.read = true;
            flipped.push(message.id.clone());
        }
        flipped
    }

    /// Replaces the confirmed baseline with a freshly fetched history.
    ///
    /// Pending sends and confirmed messages newer than anything in the fetch
    /// survive; `read` flags already set locally are carried forward.
    pub fn rebase(&mut self, mut fetched: Vec<Message>) -> usize {
        let newest_fetched = fetched.iter().map(|m| m.timestamp).max();
        let previously_read: HashSet<MessageId> = self
            .messages
            .iter()
            .filter(|m| m.read)
            .map(|m| m.id.clone())
            .collect();

        self.messages.retain(|m| {
            m.pending || newest_fetched.map_or(true, |newest| m.timestamp > newest)
        });
        self.confirmed_ids = self
            .messages
            .iter()
            .filter(|m| !m.pending && !m.id.is_temporary())
            .map(|m| m.id.clone())
            .collect();

        fetched.sort_by_key(|m| m.timestamp);
        let mut changed = 0;
        for mut message in fetched {
            message.pending = false;
            message.read |= previously_read.contains(&message.id);
            if self.upsert(message).changed() {
                changed += 1;
            }
        }
        changed
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.confirmed_ids.clear();
        self.replaced_temp_ids.clear();
        self.guessed_temp_ids.clear();
    }

    /// A confirmation that names its temp id settles the pairing, overriding
    /// any earlier heuristic guess involving either id.
    fn apply_acknowledgment(
        &mut self,
        temp_id: &MessageId,
        incoming: &Message,
    ) -> Option<MergeResult> {
        if let Some(idx) = self.pending_index(temp_id) {
            self.release_guess(&incoming.id, temp_id);
            return Some(self.replace_pending(idx, incoming.clone(), false));
        }

        let paired = self.replaced_temp_ids.get(temp_id)?.clone();
        if paired == incoming.id {
            self.guessed_temp_ids.remove(temp_id);
            return None;
        }
        if !self.guessed_temp_ids.contains(temp_id) || self.confirmed_ids.contains(&incoming.id) {
            return None;
        }

        // The guess gave this send someone else's echo; take the slot back and
        // let the displaced echo find its own pending entry.
        let idx = self.messages.iter().position(|m| m.id == paired)?;
        let entry = &mut self.messages[idx];
        let displaced = entry.clone();
        entry.id = incoming.id.clone();
        entry.content = incoming.content.clone();
        if !incoming.attachments.is_empty() {
            entry.attachments = incoming.attachments.clone();
        }
        entry.timestamp = incoming.timestamp;
        entry.read |= incoming.read;
        entry.temp_id = Some(temp_id.clone());

        self.confirmed_ids.remove(&paired);
        self.confirmed_ids.insert(incoming.id.clone());
        self.replaced_temp_ids
            .insert(temp_id.clone(), incoming.id.clone());
        self.guessed_temp_ids.remove(temp_id);
        self.restore_order_at(idx);

        self.upsert(Message {
            temp_id: None,
            ..displaced
        });
        Some(MergeResult::Replaced {
            previous_id: temp_id.clone(),
        })
    }

    /// Turns an entry that holds `confirmed_id` through a guess back into the
    /// pending message it was before, unless that guess was for `keep`.
    fn release_guess(&mut self, confirmed_id: &MessageId, keep: &MessageId) {
        let Some(idx) = self.messages.iter().position(|m| m.id == *confirmed_id) else {
            return;
        };
        let Some(original) = self.messages[idx].temp_id.clone() else {
            return;
        };
        if original == *keep || !self.guessed_temp_ids.remove(&original) {
            return;
        }
        self.replaced_temp_ids.remove(&original);
        self.confirmed_ids.remove(confirmed_id);
        let entry = &mut self.messages[idx];
        entry.id = original;
        entry.pending = true;
        entry.temp_id = None;
    }

    fn pending_index(&self, temp_id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.pending && m.id == *temp_id)
    }

    fn is_known(&self, incoming: &Message) -> bool {
        if incoming.id.is_temporary() {
            return self.messages.iter().any(|m| m.id == incoming.id)
                || self.replaced_temp_ids.contains_key(&incoming.id);
        }
        if self.confirmed_ids.contains(&incoming.id) {
            return true;
        }
        // Echo of a send that another acknowledgment already confirmed.
        incoming
            .temp_id
            .as_ref()
            .and_then(|temp_id| self.replaced_temp_ids.get(temp_id))
            .is_some_and(|confirmed| self.confirmed_ids.contains(confirmed))
    }

    fn find_pending_counterpart(&self, incoming: &Message) -> Option<usize> {
        if let Some(temp_id) = &incoming.temp_id {
            if let Some(idx) = self
                .messages
                .iter()
                .position(|m| m.pending && m.id == *temp_id)
            {
                return Some(idx);
            }
        }
        self.messages.iter().position(|m| {
            m.pending
                && m.sender_id == incoming.sender_id
                && m.content == incoming.content
                && self.within_skew(m.timestamp, incoming.timestamp)
        })
    }

    fn within_skew(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        (a - b).num_milliseconds().abs() <= self.skew_window_ms
    }

    fn replace_pending(&mut self, idx: usize, incoming: Message, guessed: bool) -> MergeResult {
        let previous = &self.messages[idx];
        let previous_id = previous.id.clone();
        let merged = Message {
            id: incoming.id,
            conversation_id: previous.conversation_id.clone(),
            sender_id: previous.sender_id.clone(),
            content: incoming.content,
            attachments: if incoming.attachments.is_empty() {
                previous.attachments.clone()
            } else {
                incoming.attachments
            },
            timestamp: incoming.timestamp,
            pending: false,
            read: previous.read || incoming.read,
            temp_id: Some(previous_id.clone()),
        };

        if !merged.id.is_temporary() {
            self.confirmed_ids.insert(merged.id.clone());
        }
        self.replaced_temp_ids
            .insert(previous_id.clone(), merged.id.clone());
        if guessed {
            self.guessed_temp_ids.insert(previous_id.clone());
        } else {
            self.guessed_temp_ids.remove(&previous_id);
        }
        self.messages[idx] = merged;
        self.restore_order_at(idx);
        MergeResult::Replaced { previous_id }
    }

    fn insert_ordered(&mut self, message: Message) {
        if !message.pending && !message.id.is_temporary() {
            self.confirmed_ids.insert(message.id.clone());
        }
        let idx = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(idx, message);
    }

    // A corrected timestamp may move the entry past its neighbours.
    fn restore_order_at(&mut self, idx: usize) {
        let ts = self.messages[idx].timestamp;
        let before_ok = idx == 0 || self.messages[idx - 1].timestamp <= ts;
        let after_ok = idx + 1 >= self.messages.len() || self.messages[idx + 1].timestamp >= ts;
        if before_ok && after_ok {
            return;
        }
        let message = self.messages.remove(idx);
        let target = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(target, message);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
