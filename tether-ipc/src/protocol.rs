//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Initialization payload handed to every spawned shared worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInit {
    /// Resource key the worker was launched for
    pub filename: String,
    /// Host-assigned worker id (`shared-worker/<n>`)
    pub id: String,
    /// Caller supplied initial data
    #[serde(default)]
    pub initial_data: JsonValue,
}

/// Messages a worker sends to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// Worker finished starting up
    Available,

    /// Worker dropped the registration of a client session
    DeregisteredTestWorker { id: String },
}

/// Messages the host sends down a client's message port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// The shared worker is available and the port is being handed over
    Ready,
}

/// Identifier of a message port relayed over a process pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Frames written to an out-of-process worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostFrame {
    /// First frame of every connection
    Initialize { init: WorkerInit },

    /// Register a client session; its port is relayed as `port`
    RegisterTestWorker { id: String, file: String, port: PortId },

    /// Ask the worker to drop a client session
    DeregisterTestWorker { id: String },

    /// Payload posted by a client on a relayed port
    PortMessage { port: PortId, payload: JsonValue },
}

/// Frames read from an out-of-process worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerFrame {
    Available,

    DeregisteredTestWorker { id: String },

    /// Unrecoverable fault inside the worker
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    /// Payload the worker posted on a relayed port
    PortMessage { port: PortId, payload: JsonValue },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
