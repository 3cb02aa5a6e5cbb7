//! Transferable message ports
//!
//! A [`MessagePort`] is one end of a bidirectional JSON channel. Ports are
//! created in connected pairs and are deliberately not `Clone`: handing a port
//! to a worker moves it, so the sender can no longer use it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::error::IpcError;

/// One end of a connected message channel
#[derive(Debug)]
pub struct MessagePort {
    tx: mpsc::UnboundedSender<JsonValue>,
    rx: mpsc::UnboundedReceiver<JsonValue>,
}

impl MessagePort {
    /// Create two connected ports
    pub fn pair() -> (MessagePort, MessagePort) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();

        (
            MessagePort {
                tx: left_tx,
                rx: left_rx,
            },
            MessagePort {
                tx: right_tx,
                rx: right_rx,
            },
        )
    }

    /// Serialize and post a message to the other end
    pub fn post_message<T: Serialize>(&self, message: &T) -> Result<(), IpcError> {
        let value = serde_json::to_value(message)?;
        self.post_value(value)
    }

    /// Post a raw JSON value to the other end
    pub fn post_value(&self, value: JsonValue) -> Result<(), IpcError> {
        self.tx.send(value).map_err(|_| IpcError::PortClosed)
    }

    /// Receive the next value, `None` once the other end is gone
    pub async fn recv(&mut self) -> Option<JsonValue> {
        self.rx.recv().await
    }

    /// Receive and decode the next message
    pub async fn recv_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, IpcError> {
        match self.rx.recv().await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Check whether the other end has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Split the port into its raw sending and receiving halves
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<JsonValue>,
        mpsc::UnboundedReceiver<JsonValue>,
    ) {
        (self.tx, self.rx)
    }
}
