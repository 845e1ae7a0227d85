use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{InboundEvent, OutboundEvent};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::SyncSettings,
    transport::{Transport, TransportError, TransportEvent},
};

const EVENT_BUFFER: usize = 256;

/// JSON-over-websocket transport. Frames look like
/// `{"event": "<name>", "data": <payload>}` in both directions.
pub struct WsTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

#[derive(Debug, Clone, Copy)]
struct ReconnectPolicy {
    attempts: u32,
    delay: Duration,
}

impl WsTransport {
    /// Derives `ws(s)://host/ws` from the http(s) server url.
    pub fn socket_url(server_url: &str) -> Result<Url> {
        let mut url = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(anyhow!("unsupported server url scheme: {other}")),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch {server_url} to {scheme}"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot be a base: {server_url}"))?
            .pop_if_empty()
            .push("ws");
        Ok(url)
    }

    /// Starts the connect/reconnect loop. The receiver feeds
    /// `ConversationSync::pump`; dropping it stops the loop.
    pub fn spawn(
        socket_url: Url,
        settings: &SyncSettings,
    ) -> (Arc<Self>, mpsc::Receiver<TransportEvent>, JoinHandle<()>) {
        let transport = Arc::new(Self {
            outbound: Mutex::new(None),
        });
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let policy = ReconnectPolicy {
            attempts: settings.reconnect_attempts,
            delay: settings.reconnect_delay(),
        };
        let task = tokio::spawn(Arc::clone(&transport).run(socket_url, events, policy));
        (transport, receiver, task)
    }

    async fn run(
        self: Arc<Self>,
        socket_url: Url,
        events: mpsc::Sender<TransportEvent>,
        policy: ReconnectPolicy,
    ) {
        let mut failures = 0u32;
        loop {
            if events.send(TransportEvent::Connecting).await.is_err() {
                return;
            }
            match connect_async(socket_url.as_str()).await {
                Ok((stream, _)) => {
                    failures = 0;
                    info!(url = %socket_url, "ws: connected");
                    if !self.drive(stream, &events).await {
                        return;
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(url = %socket_url, failures, "ws: connect failed: {err}");
                }
            }

            if events.send(TransportEvent::Disconnected).await.is_err() {
                return;
            }
            if failures > policy.attempts {
                warn!(
                    url = %socket_url,
                    attempts = policy.attempts,
                    "ws: giving up after repeated connect failures"
                );
                return;
            }
            tokio::time::sleep(policy.delay).await;
        }
    }

    /// Pumps one connected socket until it drops. Returns `false` once the
    /// event receiver is gone.
    async fn drive<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        events: &mpsc::Sender<TransportEvent>,
    ) -> bool
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut writer, mut reader) = stream.split();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().await = Some(frames_tx);

        let mut receiver_alive = events.send(TransportEvent::Connected).await.is_ok();
        while receiver_alive {
            tokio::select! {
                Some(frame) = frames_rx.recv() => {
                    if let Err(err) = writer.send(Message::Text(frame)).await {
                        warn!("ws: send failed: {err}");
                        break;
                    }
                }
                incoming = reader.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundEvent>(&text) {
                        Ok(event) => {
                            receiver_alive = events.send(TransportEvent::Inbound(event)).await.is_ok();
                        }
                        Err(err) => debug!("ws: ignoring unrecognized frame: {err}"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("ws: receive failed: {err}");
                        break;
                    }
                },
            }
        }

        *self.outbound.lock().await = None;
        receiver_alive
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        let name = event.name();
        let frame = serde_json::to_string(&event)
            .map_err(|source| TransportError::Encode { event: name, source })?;
        let guard = self.outbound.lock().await;
        let Some(frames) = guard.as_ref() else {
            return Err(TransportError::Unavailable.into());
        };
        frames
            .send(frame)
            .map_err(|err| TransportError::Send(err.to_string()))?;
        debug!(event = name, "ws: queued outbound event");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
