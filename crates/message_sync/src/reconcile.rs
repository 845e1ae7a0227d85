use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Attachment, ConversationDescriptor, Message, MessageId, UserId},
    error::ApiError,
    identity::normalize_sender_id,
    protocol::{
        ConversationScope, FilePayload, InboundEvent, MessagesReadPayload, OutboundEvent,
        OutboundMessagePayload, OutboundReadPayload, OutboundTypingPayload, SendMessageRequest,
        TypingPayload,
    },
};
use tokio::{
    sync::{broadcast, mpsc, Mutex, Notify},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::SyncSettings,
    connection::{ConnectionLifecycle, ConnectionState},
    error::SyncError,
    persistence::{MissingPersistenceApi, PersistenceApi},
    receipts::{seen_message_id, ReadReceiptTracker},
    store::{MergeResult, MessageStore},
    transport::{MissingTransport, Transport, TransportEvent},
    typing::{LocalUpdate, TypingController},
};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    /// The single self-sent message showing the "seen" indicator.
    pub seen_message_id: Option<MessageId>,
    pub is_typing: bool,
    pub other_typing: bool,
    pub connection: ConnectionState,
    pub scrolled_to_bottom: bool,
    pub last_read_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Updated(ConversationSnapshot),
    SendFailed { temp_id: MessageId, error: SyncError },
    Error(String),
}

struct ConversationState {
    store: MessageStore,
    receipts: ReadReceiptTracker,
    typing: TypingController,
    connection: ConnectionLifecycle,
    /// Typing state the peer was last told about.
    announced_typing: bool,
}

/// Who wrote a message, from this side of the conversation. Before the local
/// identity resolves, anything not from the peer counts as mine.
#[derive(Debug, Clone)]
struct Attribution {
    self_id: Option<UserId>,
    peer_id: UserId,
}

impl Attribution {
    fn is_mine(&self, message: &Message) -> bool {
        match &self.self_id {
            Some(self_id) => message.is_from(self_id),
            None => !message.is_from(&self.peer_id),
        }
    }

    fn is_incoming(&self, message: &Message) -> bool {
        !self.is_mine(message)
    }
}

/// Single entry point for fetched history, optimistic sends and socket pushes
/// of one conversation, plus the read-receipt, typing and connection state
/// derived from them.
pub struct ConversationSync {
    conversation: ConversationDescriptor,
    settings: SyncSettings,
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn PersistenceApi>,
    inner: Mutex<ConversationState>,
    confirmations: Notify,
    events: broadcast::Sender<SyncEvent>,
}

impl ConversationSync {
    pub fn new(
        conversation: ConversationDescriptor,
        settings: SyncSettings,
        self_id: Option<UserId>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            conversation,
            settings,
            self_id,
            Arc::new(MissingTransport),
            Arc::new(MissingPersistenceApi),
        )
    }

    pub fn new_with_dependencies(
        conversation: ConversationDescriptor,
        settings: SyncSettings,
        self_id: Option<UserId>,
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn PersistenceApi>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let state = ConversationState {
            store: MessageStore::new(settings.skew_window()),
            receipts: ReadReceiptTracker::new(settings.read_receipt_debounce()),
            typing: TypingController::new(),
            connection: ConnectionLifecycle::new(self_id),
            announced_typing: false,
        };
        Arc::new(Self {
            conversation,
            settings,
            transport,
            persistence,
            inner: Mutex::new(state),
            confirmations: Notify::new(),
            events,
        })
    }

    pub fn conversation(&self) -> &ConversationDescriptor {
        &self.conversation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ConversationSnapshot {
        let guard = self.inner.lock().await;
        self.snapshot_of(&guard)
    }

    /// Fetches history through the persistence API and reconciles it.
    pub async fn load_history(self: &Arc<Self>) -> Result<usize, SyncError> {
        let payloads = self
            .persistence
            .fetch_history(&self.conversation.id)
            .await
            .map_err(|err| SyncError::PersistenceFailure(format!("{err:#}")))?;

        let mut messages = Vec::with_capacity(payloads.len());
        for mut payload in payloads {
            // History endpoints are already scoped and may omit the keys.
            if payload.scope.keys().next().is_none() {
                payload.scope = ConversationScope::for_conversation(&self.conversation);
            } else if !payload.scope.belongs_to(&self.conversation) {
                continue;
            }
            match payload.into_message() {
                Ok(mut message) => {
                    message.conversation_id = self.conversation.id.clone();
                    messages.push(message);
                }
                Err(err) => warn!(
                    conversation_id = %self.conversation.id,
                    "sync: skipping malformed history entry: {err}"
                ),
            }
        }
        Ok(self.ingest_fetched(messages).await)
    }

    /// Bulk-loads history, resetting dedup bookkeeping first. Returns how many
    /// entries changed the timeline.
    pub async fn ingest_fetched(self: &Arc<Self>, messages: Vec<Message>) -> usize {
        let (changed, to_announce, snapshot) = {
            let mut guard = self.inner.lock().await;
            let attribution = self.attribution(&guard);
            let ConversationState {
                store, receipts, ..
            } = &mut *guard;

            let fetched: Vec<Message> = messages
                .into_iter()
                .filter(|m| self.conversation.matches(m.conversation_id.as_str()))
                .collect();
            let changed = store.rebase(fetched);

            let unread = ReadReceiptTracker::unread_incoming(store, |m| attribution.is_incoming(m));
            let to_announce =
                receipts.mark_visible(store, &unread, |m| attribution.is_incoming(m), Instant::now());
            (changed, to_announce, self.snapshot_of(&guard))
        };

        info!(
            conversation_id = %self.conversation.id,
            changed,
            total = snapshot.messages.len(),
            "sync: history reconciled"
        );
        self.publish(snapshot);
        self.spawn_read_announcement(to_announce);
        changed
    }

    /// Merges a confirmed message pushed over the socket. Messages addressed
    /// to another conversation are dropped and yield `None`.
    pub async fn ingest_remote(self: &Arc<Self>, mut message: Message) -> Option<MergeResult> {
        if !self.conversation.matches(message.conversation_id.as_str()) {
            debug!(
                conversation_id = %self.conversation.id,
                foreign = %message.conversation_id,
                message_id = %message.id,
                "sync: dropping message for another conversation"
            );
            return None;
        }
        message.pending = false;

        let (result, to_announce, snapshot) = {
            let mut guard = self.inner.lock().await;
            let attribution = self.attribution(&guard);
            let incoming = attribution.is_incoming(&message);
            let message_id = message.id.clone();
            let ConversationState {
                store,
                receipts,
                typing,
                ..
            } = &mut *guard;

            let result = store.upsert(message);
            if !result.changed() {
                return Some(result);
            }
            let mut to_announce = Vec::new();
            if incoming {
                typing.clear_remote();
                to_announce = receipts.mark_visible(
                    store,
                    std::slice::from_ref(&message_id),
                    |m| attribution.is_incoming(m),
                    Instant::now(),
                );
            }
            (result, to_announce, self.snapshot_of(&guard))
        };

        if let MergeResult::Replaced { previous_id } = &result {
            debug!(
                conversation_id = %self.conversation.id,
                temp_id = %previous_id,
                "sync: optimistic message confirmed by socket"
            );
            self.confirmations.notify_waiters();
        }
        self.publish(snapshot);
        self.spawn_read_announcement(to_announce);
        Some(result)
    }

    /// Optimistically appends a message, then confirms it through whichever of
    /// the socket echo or the persistence API answers first.
    pub async fn send(
        self: &Arc<Self>,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<MessageId, SyncError> {
        let timestamp = Utc::now();
        let temp_id = MessageId::temporary(timestamp);
        let mut draft = Message {
            id: temp_id.clone(),
            conversation_id: self.conversation.id.clone(),
            sender_id: UserId::new(String::new()),
            content: content.to_string(),
            attachments: attachments.clone(),
            timestamp,
            pending: true,
            read: false,
            temp_id: None,
        };
        if !draft.has_body() {
            return Err(SyncError::EmptyMessage);
        }

        let (self_id, connected, stop_typing, snapshot) = {
            let mut guard = self.inner.lock().await;
            let self_id = guard
                .connection
                .identity()
                .cloned()
                .ok_or(SyncError::IdentityUnresolved)?;
            draft.sender_id = self_id.clone();
            guard.store.upsert(draft);
            let update = guard.typing.set_local(false);
            let stop_typing = self.take_typing_emission(&mut guard, update);
            let connected = guard.connection.is_connected();
            (self_id, connected, stop_typing, self.snapshot_of(&guard))
        };
        self.publish(snapshot);
        if let Some(event) = stop_typing {
            self.emit_live(event).await;
        }

        if connected {
            self.emit_live(OutboundEvent::SendMessage(OutboundMessagePayload {
                scope: ConversationScope::for_conversation(&self.conversation),
                sender_id: self_id.clone(),
                receiver_id: self.conversation.peer_id.clone(),
                content: content.to_string(),
                timestamp,
                temp_id: temp_id.clone(),
                file: attachments.first().map(FilePayload::from),
            }))
            .await;
        } else {
            debug!(
                conversation_id = %self.conversation.id,
                temp_id = %temp_id,
                "sync: transport down, sending through persistence only"
            );
        }

        let request = SendMessageRequest {
            conversation_id: self.conversation.id.clone(),
            sender_id: self_id.clone(),
            receiver_id: self.conversation.peer_id.clone(),
            content: content.to_string(),
            timestamp,
            attachments: attachments.clone(),
            temp_id: temp_id.clone(),
        };
        let deadline = Instant::now() + self.settings.send_confirm_timeout();
        // Runs detached so an earlier socket confirmation does not cancel the
        // durable write or the merge of its acknowledgment.
        let sync = Arc::clone(self);
        let mut persisted = tokio::spawn(async move { sync.persist_send(request).await });
        let outcome = tokio::select! {
            outcome = tokio::time::timeout_at(deadline, &mut persisted) => outcome,
            Some(message_id) = self.wait_for_confirmation(&temp_id, deadline, true) => {
                debug!(
                    conversation_id = %self.conversation.id,
                    temp_id = %temp_id,
                    message_id = %message_id,
                    "sync: send confirmed before persistence answered"
                );
                return Ok(message_id);
            }
        };

        let failure = match outcome {
            Ok(Ok(Ok(message_id))) => return Ok(message_id),
            Ok(Ok(Err(failure))) => failure,
            Ok(Err(err)) => format!("persistence task failed: {err}"),
            Err(_) => {
                persisted.abort();
                "persistence api timed out".to_string()
            }
        };

        if let Some(message_id) = self.wait_for_confirmation(&temp_id, deadline, false).await {
            return Ok(message_id);
        }
        warn!(
            conversation_id = %self.conversation.id,
            temp_id = %temp_id,
            "sync: send failed: {failure}"
        );
        self.abandon_pending(&temp_id, SyncError::PersistenceFailure(failure))
            .await
    }

    /// Local content changed; drives the debounced typing indicator.
    pub async fn on_input_changed(self: &Arc<Self>, content: &str) {
        self.apply_local_typing(|typing| typing.on_input_changed(content))
            .await;
    }

    pub async fn set_typing(self: &Arc<Self>, active: bool) {
        self.apply_local_typing(|typing| typing.set_local(active))
            .await;
    }

    async fn apply_local_typing(
        self: &Arc<Self>,
        change: impl FnOnce(&mut TypingController) -> LocalUpdate,
    ) {
        let (emission, changed, snapshot) = {
            let mut guard = self.inner.lock().await;
            let update = change(&mut guard.typing);
            if let Some(generation) = update.arm_timer {
                self.arm_local_typing_timer(generation);
            }
            let emission = self.take_typing_emission(&mut guard, update);
            (emission, update.emit.is_some(), self.snapshot_of(&guard))
        };
        if changed {
            self.publish(snapshot);
        }
        if let Some(event) = emission {
            self.emit_live(event).await;
        }
    }

    /// External "scrolled to bottom" signal. Reaching the bottom marks every
    /// unread incoming message.
    pub async fn set_scrolled_to_bottom(self: &Arc<Self>, at_bottom: bool) {
        let (changed, to_announce, snapshot) = {
            let mut guard = self.inner.lock().await;
            let attribution = self.attribution(&guard);
            let ConversationState {
                store, receipts, ..
            } = &mut *guard;
            let changed = receipts.scrolled_to_bottom() != at_bottom;
            let to_announce = if receipts.set_scrolled_to_bottom(at_bottom) {
                let unread =
                    ReadReceiptTracker::unread_incoming(store, |m| attribution.is_incoming(m));
                receipts.mark_visible(store, &unread, |m| attribution.is_incoming(m), Instant::now())
            } else {
                Vec::new()
            };
            (changed, to_announce, self.snapshot_of(&guard))
        };
        if changed {
            self.publish(snapshot);
        }
        if !to_announce.is_empty() {
            self.announce_read(to_announce).await;
        }
    }

    /// Marks the given incoming messages read when the view is at the bottom.
    /// Returns the ids that were newly marked.
    pub async fn mark_visible_as_read(self: &Arc<Self>, ids: &[MessageId]) -> Vec<MessageId> {
        let (flipped, snapshot) = {
            let mut guard = self.inner.lock().await;
            let attribution = self.attribution(&guard);
            let ConversationState {
                store, receipts, ..
            } = &mut *guard;
            let flipped =
                receipts.mark_visible(store, ids, |m| attribution.is_incoming(m), Instant::now());
            (flipped, self.snapshot_of(&guard))
        };
        if flipped.is_empty() {
            return flipped;
        }
        self.publish(snapshot);
        self.announce_read(flipped.clone()).await;
        flipped
    }

    /// Guest sessions learn their id late; registration and any typing state
    /// held back meanwhile go out now.
    pub async fn resolve_identity(self: &Arc<Self>, user_id: UserId) {
        let (register, typing) = {
            let mut guard = self.inner.lock().await;
            let register = guard.connection.resolve_identity(user_id);
            let typing = self.take_unannounced_typing(&mut guard);
            (register, typing)
        };
        if let Some(user_id) = register {
            info!(conversation_id = %self.conversation.id, user_id = %user_id, "sync: registering resolved identity");
            self.emit_live(OutboundEvent::Register(user_id)).await;
        }
        if let Some(event) = typing {
            self.emit_live(event).await;
        }
    }

    pub fn spawn_pump(self: &Arc<Self>, events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move { sync.pump(events).await })
    }

    /// Applies transport events in arrival order until the channel closes.
    pub async fn pump(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_transport_event(event).await;
        }
        debug!(conversation_id = %self.conversation.id, "sync: transport event stream ended");
    }

    pub async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                let snapshot = {
                    let mut guard = self.inner.lock().await;
                    guard.connection.on_connecting();
                    self.snapshot_of(&guard)
                };
                self.publish(snapshot);
            }
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Disconnected => {
                let (ended, snapshot) = {
                    let mut guard = self.inner.lock().await;
                    let ended = guard.connection.on_disconnected();
                    guard.announced_typing = false;
                    (ended, self.snapshot_of(&guard))
                };
                if ended {
                    info!(conversation_id = %self.conversation.id, "sync: transport disconnected");
                }
                self.publish(snapshot);
            }
            TransportEvent::Inbound(event) => self.handle_inbound(event).await,
        }
    }

    async fn on_connected(self: &Arc<Self>) {
        let (outcome, typing, snapshot) = {
            let mut guard = self.inner.lock().await;
            let outcome = guard.connection.on_connected();
            // Emitted after registration.
            let typing = self.take_unannounced_typing(&mut guard);
            (outcome, typing, self.snapshot_of(&guard))
        };
        info!(
            conversation_id = %self.conversation.id,
            reconnect = outcome.is_reconnect,
            "sync: transport connected"
        );
        self.publish(snapshot);

        match outcome.register {
            Some(user_id) => self.emit_live(OutboundEvent::Register(user_id)).await,
            None => debug!(
                conversation_id = %self.conversation.id,
                "sync: registration deferred until identity resolves"
            ),
        }
        if let Some(event) = typing {
            self.emit_live(event).await;
        }

        if outcome.is_reconnect && self.settings.refetch_on_reconnect {
            if let Err(err) = self.load_history().await {
                warn!(conversation_id = %self.conversation.id, "sync: refetch after reconnect failed: {err}");
                let _ = self.events.send(SyncEvent::Error(err.to_string()));
            }
        }
    }

    async fn handle_inbound(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::ReceiveMessage(payload) => {
                if !payload.scope.belongs_to(&self.conversation) {
                    debug!(
                        conversation_id = %self.conversation.id,
                        message_id = payload.message_id().unwrap_or_default(),
                        "sync: ignoring push for another conversation"
                    );
                    return;
                }
                match payload.into_message() {
                    Ok(mut message) => {
                        message.conversation_id = self.conversation.id.clone();
                        self.ingest_remote(message).await;
                    }
                    Err(err) => {
                        warn!(conversation_id = %self.conversation.id, "sync: malformed push: {err}");
                        let _ = self
                            .events
                            .send(SyncEvent::Error(SyncError::from(err).to_string()));
                    }
                }
            }
            InboundEvent::Typing(payload) => self.on_remote_typing(payload).await,
            InboundEvent::MessagesRead(payload) => self.on_remote_read(payload).await,
        }
    }

    async fn on_remote_typing(self: &Arc<Self>, payload: TypingPayload) {
        if !payload.scope.belongs_to(&self.conversation) {
            return;
        }
        let Some(sender_id) = normalize_sender_id(&payload.sender_id) else {
            return;
        };
        let (changed, snapshot) = {
            let mut guard = self.inner.lock().await;
            if guard
                .connection
                .identity()
                .is_some_and(|self_id| self_id.is_same_as(&sender_id))
            {
                return;
            }
            let update = guard.typing.on_remote(payload.is_typing);
            if let Some(generation) = update.arm_timer {
                self.arm_remote_typing_timer(generation);
            }
            (update.changed, self.snapshot_of(&guard))
        };
        if changed {
            self.publish(snapshot);
        }
    }

    async fn on_remote_read(self: &Arc<Self>, payload: MessagesReadPayload) {
        if !payload.scope.belongs_to(&self.conversation) {
            return;
        }
        let (flipped, snapshot) = {
            let mut guard = self.inner.lock().await;
            let attribution = self.attribution(&guard);
            let flipped = ReadReceiptTracker::apply_remote_read(
                &mut guard.store,
                &payload.message_ids,
                |m| attribution.is_mine(m),
            );
            (flipped, self.snapshot_of(&guard))
        };
        if !flipped.is_empty() {
            debug!(
                conversation_id = %self.conversation.id,
                count = flipped.len(),
                "sync: peer read my messages"
            );
            self.publish(snapshot);
        }
    }

    async fn on_local_typing_timer(self: &Arc<Self>, generation: u64) {
        let (emission, snapshot) = {
            let mut guard = self.inner.lock().await;
            if !guard.typing.on_local_timer(generation) {
                return;
            }
            let update = LocalUpdate {
                emit: Some(false),
                arm_timer: None,
            };
            (
                self.take_typing_emission(&mut guard, update),
                self.snapshot_of(&guard),
            )
        };
        self.publish(snapshot);
        if let Some(event) = emission {
            self.emit_live(event).await;
        }
    }

    async fn on_remote_typing_timeout(self: &Arc<Self>, generation: u64) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            if !guard.typing.on_remote_timeout(generation) {
                return;
            }
            self.snapshot_of(&guard)
        };
        debug!(conversation_id = %self.conversation.id, "sync: remote typing expired without stop");
        self.publish(snapshot);
    }

    fn arm_local_typing_timer(self: &Arc<Self>, generation: u64) {
        let sync: Weak<Self> = Arc::downgrade(self);
        let after = self.settings.typing_stop_after();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(sync) = sync.upgrade() {
                sync.on_local_typing_timer(generation).await;
            }
        });
    }

    fn arm_remote_typing_timer(self: &Arc<Self>, generation: u64) {
        let sync: Weak<Self> = Arc::downgrade(self);
        let after = self.settings.remote_typing_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(sync) = sync.upgrade() {
                sync.on_remote_typing_timeout(generation).await;
            }
        });
    }

    /// Turns a local typing transition into an outbound event when it can be
    /// delivered now. Without a connection or a resolved identity nothing is
    /// sent; the unannounced state is flushed once identity resolves.
    fn take_typing_emission(
        &self,
        state: &mut ConversationState,
        update: LocalUpdate,
    ) -> Option<OutboundEvent> {
        let is_typing = update.emit?;
        if !state.connection.is_connected() {
            return None;
        }
        let sender_id = state.connection.identity()?.clone();
        state.announced_typing = is_typing;
        Some(OutboundEvent::Typing(OutboundTypingPayload {
            sender_id,
            receiver_id: self.conversation.peer_id.clone(),
            is_typing,
            scope: ConversationScope::for_conversation(&self.conversation),
        }))
    }

    /// Typing state that changed while it could not be announced.
    fn take_unannounced_typing(&self, state: &mut ConversationState) -> Option<OutboundEvent> {
        let is_typing = state.typing.is_typing();
        if is_typing == state.announced_typing {
            return None;
        }
        let update = LocalUpdate {
            emit: Some(is_typing),
            arm_timer: None,
        };
        self.take_typing_emission(state, update)
    }

    /// Durable write of one send, merging the acknowledgment as soon as it
    /// arrives. Errors carry the failure text for `SendFailed`.
    async fn persist_send(&self, request: SendMessageRequest) -> Result<MessageId, String> {
        let response = match self.persistence.send_message(request.clone()).await {
            Ok(response) => response,
            Err(err) => {
                let retryable = err
                    .downcast_ref::<ApiError>()
                    .is_some_and(ApiError::is_retryable);
                debug!(
                    conversation_id = %self.conversation.id,
                    temp_id = %request.temp_id,
                    retryable,
                    "sync: persistence send failed: {err:#}"
                );
                return Err(format!("{err:#}"));
            }
        };
        if !response.success {
            return Err("persistence api rejected the message".to_string());
        }
        let message_id = response
            .message_id
            .ok_or_else(|| "persistence response carried no message id".to_string())?;

        let temp_id = request.temp_id.clone();
        self.ingest_confirmation(Message {
            id: message_id,
            conversation_id: request.conversation_id,
            sender_id: request.sender_id,
            content: request.content,
            attachments: request.attachments,
            timestamp: response.timestamp.unwrap_or(request.timestamp),
            pending: false,
            read: false,
            temp_id: Some(request.temp_id),
        })
        .await
        .ok_or_else(|| format!("acknowledgment left {temp_id} unconfirmed"))
    }

    /// Merges a persistence acknowledgment and returns the id the optimistic
    /// entry now carries, or `None` if it is somehow still pending.
    async fn ingest_confirmation(&self, confirmed: Message) -> Option<MessageId> {
        let temp_id = confirmed.temp_id.clone()?;
        let (result, confirmed_id, snapshot) = {
            let mut guard = self.inner.lock().await;
            let result = guard.store.upsert(confirmed);
            let confirmed_id = if guard.store.is_pending(&temp_id) {
                None
            } else {
                guard.store.confirmed_id_for(&temp_id).cloned()
            };
            (result, confirmed_id, self.snapshot_of(&guard))
        };
        if let MergeResult::Replaced { previous_id } = &result {
            debug!(
                conversation_id = %self.conversation.id,
                temp_id = %previous_id,
                "sync: optimistic message confirmed by persistence"
            );
            self.publish(snapshot);
        }
        self.confirmations.notify_waiters();
        confirmed_id
    }

    /// Waits until `temp_id` is paired with a server id. With
    /// `acknowledged_only`, pairings made by the content heuristic do not count.
    async fn wait_for_confirmation(
        &self,
        temp_id: &MessageId,
        deadline: Instant,
        acknowledged_only: bool,
    ) -> Option<MessageId> {
        loop {
            let notified = self.confirmations.notified();
            {
                let guard = self.inner.lock().await;
                let confirmed = if acknowledged_only {
                    guard.store.acknowledged_id_for(temp_id)
                } else {
                    guard.store.confirmed_id_for(temp_id)
                };
                if let Some(confirmed) = confirmed {
                    return Some(confirmed.clone());
                }
                let paired = guard.store.confirmed_id_for(temp_id).is_some();
                if !paired && !guard.store.is_pending(temp_id) {
                    return None;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    async fn abandon_pending(
        &self,
        temp_id: &MessageId,
        error: SyncError,
    ) -> Result<MessageId, SyncError> {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.store.remove_pending(temp_id);
            self.snapshot_of(&guard)
        };
        self.publish(snapshot);
        let _ = self.events.send(SyncEvent::SendFailed {
            temp_id: temp_id.clone(),
            error: error.clone(),
        });
        Err(error)
    }

    fn spawn_read_announcement(self: &Arc<Self>, ids: Vec<MessageId>) {
        if ids.is_empty() {
            return;
        }
        let sync = Arc::clone(self);
        tokio::spawn(async move { sync.announce_read(ids).await });
    }

    /// Live receipt over the socket plus the durable record; either may fail
    /// without undoing the local `read` flag.
    async fn announce_read(&self, ids: Vec<MessageId>) {
        let (connected, reader_id) = {
            let guard = self.inner.lock().await;
            (
                guard.connection.is_connected(),
                guard.connection.identity().cloned(),
            )
        };
        if connected {
            self.emit_live(OutboundEvent::MessagesRead(OutboundReadPayload {
                scope: ConversationScope::for_conversation(&self.conversation),
                message_ids: ids.clone(),
                receiver_id: self.conversation.peer_id.clone(),
                reader_id,
            }))
            .await;
        }
        if let Err(err) = self.persistence.mark_read(&self.conversation.id, &ids).await {
            warn!(
                conversation_id = %self.conversation.id,
                count = ids.len(),
                "sync: durable mark-read failed: {err:#}"
            );
            let _ = self.events.send(SyncEvent::Error(format!(
                "failed to persist read state: {err}"
            )));
        }
    }

    async fn emit_live(&self, event: OutboundEvent) {
        let name = event.name();
        if let Err(err) = self.transport.emit(event).await {
            debug!(
                conversation_id = %self.conversation.id,
                event = name,
                "sync: live emission skipped: {err}"
            );
        }
    }

    fn attribution(&self, state: &ConversationState) -> Attribution {
        Attribution {
            self_id: state.connection.identity().cloned(),
            peer_id: self.conversation.peer_id.clone(),
        }
    }

    fn snapshot_of(&self, state: &ConversationState) -> ConversationSnapshot {
        let attribution = self.attribution(state);
        ConversationSnapshot {
            messages: state.store.snapshot(),
            seen_message_id: seen_message_id(state.store.messages(), |m| attribution.is_mine(m)),
            is_typing: state.typing.is_typing(),
            other_typing: state.typing.other_typing(),
            connection: state.connection.state(),
            scrolled_to_bottom: state.receipts.scrolled_to_bottom(),
            last_read_timestamp: state.receipts.last_read_timestamp(),
        }
    }

    fn publish(&self, snapshot: ConversationSnapshot) {
        let _ = self.events.send(SyncEvent::Updated(snapshot));
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
