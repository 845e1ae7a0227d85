use anyhow::Result;
use async_trait::async_trait;
use shared::protocol::{InboundEvent, OutboundEvent};
use thiserror::Error;

/// What a socket adapter reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    Inbound(InboundEvent),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    Unavailable,
    #[error("failed to encode {event} event: {source}")]
    Encode {
        event: &'static str,
        source: serde_json::Error,
    },
    #[error("socket send failed: {0}")]
    Send(String),
}

/// Outbound half of the real-time channel. Emission is fire-and-forget: the
/// engine never retries, the persistence API is the durable path.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, event: OutboundEvent) -> Result<()>;
}

pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn emit(&self, _event: OutboundEvent) -> Result<()> {
        Err(TransportError::Unavailable.into())
    }
}
