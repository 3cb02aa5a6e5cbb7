//! Inter-process communication for tether
//!
//! This crate provides the message protocol, the transferable message port and
//! the frame transport used between the host and its shared workers.

pub mod error;
pub mod port;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use port::MessagePort;
pub use protocol::{
    ClientMessage, HostFrame, MessageEnvelope, PortId, WorkerFrame, WorkerInit, WorkerMessage,
    IPC_PROTOCOL_VERSION,
};
pub use transport::{FrameReader, FrameWriter, FramedTransport, IpcTransport, StdioTransport};
