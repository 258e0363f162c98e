use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::db::ReadingPayload;

/// Why a subscriber's stream is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Session closed after a disconnect, transport error or shutdown.
    Closed,
    /// The snapshot read failed; no session was started.
    SetupFailed,
    /// Connect arrived after shutdown began.
    ShuttingDown,
    /// The last send failed, the transport is most likely gone.
    EmitFailed,
}

/// Outbound half of a stream connection.
///
/// A failed `send` closes the owning session; it is never retried.
#[async_trait]
pub trait Subscriber: Send + 'static {
    async fn send(&mut self, payload: &ReadingPayload) -> Result<()>;

    /// Best-effort notice that no more readings will follow.
    async fn close(&mut self, _reason: CloseReason) {}
}

/// In-process subscriber backed by an unbounded channel.
///
/// Sends fail once the receiving side is dropped, which the session treats
/// like a transport error.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<ReadingPayload>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReadingPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&mut self, payload: &ReadingPayload) -> Result<()> {
        self.tx
            .send(payload.clone())
            .map_err(|_| anyhow!("subscriber channel closed"))
    }
}
