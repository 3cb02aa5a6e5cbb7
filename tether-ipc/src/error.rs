//! IPC error types

use thiserror::Error;

/// Errors raised while moving frames or port messages
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A frame or port message that could not be decoded
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    /// The byte stream reached end of file
    #[error("Connection closed")]
    ConnectionClosed,

    /// The other end of a message port is gone
    #[error("Message port closed")]
    PortClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },
}

impl IpcError {
    /// Whether the stream can no longer be trusted
    ///
    /// An undecodable frame only loses that frame; a peer speaking another
    /// protocol version loses every frame after it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::ProtocolVersionMismatch { .. })
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}
