//! End-to-end test of a shared worker running as a child process
//!
//! The worker is a small `/bin/sh` script that speaks the frame protocol.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tether_config::SharedWorkerConfig;
use tether_ipc::{HostFrame, MessageEnvelope};
use tether_workers::{
    observe_worker_process, ClientMessage, ClientSession, Fork, ProcessSpawner, RunStatus,
    TaskCompletion, WorkerRegistry,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn frame(message: &str) -> String {
    format!(
        r#"{{"protocol_version":1,"timestamp":"2026-01-01T00:00:00Z","message":{}}}"#,
        message
    )
}

/// Announce availability, greet the first registered port, then acknowledge
/// the deregistration of `fork-p` and stay alive until stdin closes
fn worker_script() -> String {
    let available = frame(r#"{"type":"available"}"#);
    let greeting = frame(r#"{"type":"port-message","port":0,"payload":{"hello":"from process"}}"#);
    let acknowledged = frame(r#"{"type":"deregistered-test-worker","id":"fork-p"}"#);

    format!(
        "read -r init; printf '%s\\n' '{available}'; \
         read -r register; printf '%s\\n' '{greeting}'; \
         read -r deregister; printf '%s\\n' '{acknowledged}'; \
         cat > /dev/null",
    )
}

#[tokio::test]
async fn test_process_worker_round_trip() -> Result<()> {
    let config = SharedWorkerConfig {
        program: Some("/bin/sh".into()),
        args: vec!["-c".to_string(), worker_script()],
        ..SharedWorkerConfig::default()
    };
    let spawner = ProcessSpawner::from_config(&config)?;
    let registry = Arc::new(WorkerRegistry::new(Arc::new(spawner), config));

    let (trigger, completion) = TaskCompletion::channel();
    let (fork, connector) = Fork::new(ClientSession::with_id("fork-p", "/tmp/p.test.js", completion));
    let (run_status, mut status) = RunStatus::channel();

    let deregistration = observe_worker_process(registry.clone(), fork, run_status);
    let mut connection = connector.connect("/srv/process-worker.js", json!({"mode": "test"}))?;

    assert_eq!(
        timeout(WAIT, connection.port.recv_message::<ClientMessage>()).await??,
        Some(ClientMessage::Ready)
    );
    assert_eq!(
        timeout(WAIT, connection.port.recv()).await?,
        Some(json!({"hello": "from process"}))
    );

    trigger.complete();
    timeout(WAIT, deregistration.wait()).await?;
    assert_eq!(deregistration.registrations(), 0);
    assert!(status.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn test_initialize_frame_reaches_worker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let captured = dir.path().join("init.json");

    let script = format!("read -r init; printf '%s\\n' \"$init\" > '{}'", captured.display());
    let spawner = ProcessSpawner::new("/bin/sh").with_args(["-c".to_string(), script]);
    let registry = WorkerRegistry::with_defaults(Arc::new(spawner));

    let handle = registry
        .get_or_create(&"/srv/init.js".into(), json!({"answer": 42}))
        .await;
    assert_eq!(timeout(WAIT, handle.exited()).await?, Some(0));

    let envelope: MessageEnvelope<HostFrame> = serde_json::from_str(&std::fs::read_to_string(&captured)?)?;
    match envelope.message {
        HostFrame::Initialize { init } => {
            assert_eq!(init.filename, "/srv/init.js");
            assert_eq!(init.id, "shared-worker/1");
            assert_eq!(init.initial_data, json!({"answer": 42}));
        }
        other => anyhow::bail!("expected initialize frame, got {:?}", other),
    }

    Ok(())
}
