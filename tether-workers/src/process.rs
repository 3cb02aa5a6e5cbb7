//! Shared workers running as child processes
//!
//! The child speaks newline-delimited [`MessageEnvelope`] frames: it reads
//! [`HostFrame`]s on stdin and writes [`WorkerFrame`]s on stdout. The first
//! frame it receives is always `initialize`. Client ports handed over at
//! registration are relayed through the pipe as numbered `port-message`
//! frames.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_config::{ConfigError, SharedWorkerConfig};
use tether_ipc::{
    FrameReader, FrameWriter, HostFrame, IpcError, MessageEnvelope, PortId, WorkerFrame, WorkerMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{WorkerError, WorkerFault};
use crate::spawn::{
    worker_link, HostMessage, SpawnRequest, SpawnedWorker, WorkerEndpoint, WorkerEvent, WorkerSpawner,
};

type PortTable = Arc<Mutex<HashMap<PortId, mpsc::UnboundedSender<JsonValue>>>>;

/// Launches each shared worker as `program <exec flags> <args>`
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &SharedWorkerConfig) -> Result<Self, WorkerError> {
        let program = config.program.clone().ok_or_else(|| {
            ConfigError::ValidationError("workers.program is required to run worker processes".to_string())
        })?;
        Ok(Self::new(program).with_args(config.args.clone()))
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, request: SpawnRequest) -> SpawnedWorker {
        let (spawned, endpoint) = worker_link();

        let mut command = Command::new(&self.program);
        command
            .args(&request.exec_flags)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                debug!(worker_id = %request.id, pid = ?child.id(), "Spawned shared worker process");
                tokio::spawn(supervise(child, request, endpoint));
            }
            Err(e) => {
                warn!(worker_id = %request.id, "Failed to spawn shared worker process: {}", e);
                endpoint.abort(WorkerFault::SpawnFailed {
                    reason: format!("failed to spawn {}: {}", self.program.display(), e),
                });
            }
        }

        spawned
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    /// The worker closed stdout
    Closed,
    /// The worker broke the protocol and must be stopped
    Broken,
}

/// Owns the child until it exits, then reports the exit
async fn supervise(mut child: Child, request: SpawnRequest, endpoint: WorkerEndpoint) {
    let worker_id = request.id.clone();
    let (inbox, events) = endpoint.into_parts();

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = events.send(WorkerEvent::Error(WorkerFault::SpawnFailed {
            reason: "worker process has no stdio pipes".to_string(),
        }));
        let _ = child.start_kill();
        let code = child.wait().await.ok().and_then(|status| status.code());
        let _ = events.send(WorkerEvent::Exit(code));
        return;
    };

    let ports: PortTable = Arc::new(Mutex::new(HashMap::new()));
    let (frames, frames_rx) = mpsc::unbounded_channel();
    let _ = frames.send(HostFrame::Initialize {
        init: request.init(),
    });

    tokio::spawn(write_frames(worker_id.clone(), FrameWriter::new(stdin), frames_rx));
    tokio::spawn(dispatch_host_messages(inbox, frames, ports.clone()));

    let outcome = read_frames(&worker_id, FrameReader::new(stdout), &events, &ports).await;
    if outcome == ReadOutcome::Broken {
        if let Err(e) = child.start_kill() {
            debug!(worker_id = %worker_id, "Failed to kill worker process: {}", e);
        }
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!(worker_id = %worker_id, "Failed to wait for worker process: {}", e);
            None
        }
    };
    lock(&ports).clear();
    let _ = events.send(WorkerEvent::Exit(code));
}

async fn write_frames<W: AsyncWrite + Unpin>(
    worker_id: String,
    mut writer: FrameWriter<W>,
    mut frames: mpsc::UnboundedReceiver<HostFrame>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.send(&MessageEnvelope::new(frame)).await {
            // Expected once the worker has terminated
            debug!(worker_id = %worker_id, "Worker stdin closed: {}", e);
            break;
        }
    }
}

/// Translate host messages into frames, relaying handed-over ports
async fn dispatch_host_messages(
    mut inbox: mpsc::UnboundedReceiver<HostMessage>,
    frames: mpsc::UnboundedSender<HostFrame>,
    ports: PortTable,
) {
    let mut next_port = 0;

    while let Some(message) = inbox.recv().await {
        let frame = match message {
            HostMessage::RegisterTestWorker { id, file, port } => {
                let port_id = PortId(next_port);
                next_port += 1;

                let (to_client, mut from_client) = port.into_parts();
                lock(&ports).insert(port_id, to_client);

                let relay = frames.clone();
                tokio::spawn(async move {
                    while let Some(payload) = from_client.recv().await {
                        if relay.send(HostFrame::PortMessage { port: port_id, payload }).is_err() {
                            break;
                        }
                    }
                });

                HostFrame::RegisterTestWorker {
                    id,
                    file,
                    port: port_id,
                }
            }
            HostMessage::DeregisterTestWorker { id } => HostFrame::DeregisterTestWorker { id },
        };

        if frames.send(frame).is_err() {
            break;
        }
    }
}

async fn read_frames<R: AsyncRead + Unpin>(
    worker_id: &str,
    mut reader: FrameReader<R>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    ports: &PortTable,
) -> ReadOutcome {
    loop {
        let envelope = match reader.receive::<WorkerFrame>().await {
            Ok(envelope) => envelope,
            Err(IpcError::ConnectionClosed) => {
                debug!(worker_id = %worker_id, "Worker stdout closed");
                return ReadOutcome::Closed;
            }
            Err(IpcError::DeserializationError(e)) => {
                warn!(worker_id = %worker_id, "Skipping unreadable frame from worker: {}", e);
                continue;
            }
            Err(e) if e.is_fatal() => {
                let _ = events.send(WorkerEvent::Error(WorkerFault::Disconnected {
                    reason: e.to_string(),
                }));
                return ReadOutcome::Broken;
            }
            Err(e) => {
                error!(worker_id = %worker_id, "Failed to read from worker stdout: {}", e);
                return ReadOutcome::Closed;
            }
        };

        let event = match envelope.message {
            WorkerFrame::Available => WorkerEvent::Message(WorkerMessage::Available),
            WorkerFrame::DeregisteredTestWorker { id } => {
                WorkerEvent::Message(WorkerMessage::DeregisteredTestWorker { id })
            }
            WorkerFrame::Error { message, stack } => {
                WorkerEvent::Error(WorkerFault::Crashed { message, stack })
            }
            WorkerFrame::PortMessage { port, payload } => {
                relay_to_client(worker_id, ports, port, payload);
                continue;
            }
        };

        if events.send(event).is_err() {
            return ReadOutcome::Closed;
        }
    }
}

fn relay_to_client(worker_id: &str, ports: &PortTable, port: PortId, payload: JsonValue) {
    let mut ports = lock(ports);
    let Some(client) = ports.get(&port) else {
        debug!(worker_id = %worker_id, %port, "Dropping message for unknown port");
        return;
    };

    if client.send(payload).is_err() {
        debug!(worker_id = %worker_id, %port, "Client port closed");
        ports.remove(&port);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
