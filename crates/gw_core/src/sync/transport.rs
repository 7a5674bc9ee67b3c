//! Transport seam. The engine only needs "send one message" and "next inbound
//! message, or `None` once the peer is gone".

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use super::message::WireMessage;
use crate::error::{CoreError, Result};

pub type RecvFuture<'a> = Pin<Box<dyn Future<Output = Option<WireMessage>> + Send + 'a>>;

pub trait Transport: Send {
    fn send(&self, message: WireMessage) -> Result<()>;

    /// Resolves to `None` when the connection is closed.
    fn recv(&mut self) -> RecvFuture<'_>;
}

/// In-memory duplex link. Dropping one end closes the other.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.rx.try_recv().ok()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: WireMessage) -> Result<()> {
        let event = message.event_name();
        self.tx
            .send(message)
            .map_err(|_| CoreError::Transport(format!("peer gone while sending {event}")))
    }

    fn recv(&mut self) -> RecvFuture<'_> {
        Box::pin(self.rx.recv())
    }
}
