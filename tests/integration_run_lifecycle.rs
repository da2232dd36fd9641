//! Run lifecycle integration tests
//!
//! Drives the host context end to end with real shell-script capabilities.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use caprun::config::{Config, HostPaths};
use caprun::daemon::{self, HostContext, RECOVERED_SUMMARY};
use caprun::domain::{CancelRequest, Initiator, RunRecord, RunRequest, RunStatus, metadata_keys};
use caprun::error::{CaprunError, Result};
use caprun::events::ConsoleEvent;
use caprun::id::{offset_from_minutes, timestamp_now};
use caprun::ipc::{ConsoleClient, ConsoleClientConfig, ConsoleRequest, ConsoleServerConfig};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Write an executable script from a child process (avoids ETXTBSY races)
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg("cat > \"$1\" && chmod +x \"$1\"")
        .arg("sh")
        .arg(&path)
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(format!("#!/bin/sh\n{}", body).as_bytes()).unwrap();
    drop(stdin);
    assert!(child.wait().unwrap().success());
    path
}

struct Workspace {
    temp: TempDir,
    config: Config,
}

impl Workspace {
    fn new(manifest: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("capabilities");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest).unwrap();

        let mut config = Config::default();
        config.workspace.root = Some(temp.path().to_path_buf());
        config.secrets.root = Some(temp.path().join("secrets"));
        config.telemetry.dir = Some(temp.path().join("telemetry"));
        config.runner.cancel_grace_ms = 200;
        Self { temp, config }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        write_script(&self.temp.path().join("capabilities"), name, body)
    }

    fn context(&self) -> HostContext {
        let paths = HostPaths::resolve_with(&self.config, self.temp.path(), |_| None);
        HostContext::new(&self.config, paths)
    }
}

fn manifest(entries: &[(&str, &str)]) -> String {
    let caps: Vec<serde_json::Value> = entries
        .iter()
        .map(|(id, entrypoint)| serde_json::json!({"id": id, "summary": format!("{} summary", id), "entrypoint": entrypoint}))
        .collect();
    serde_json::json!({"version": "1.0.0", "capabilities": caps}).to_string()
}

async fn next_for(rx: &mut broadcast::Receiver<ConsoleEvent>, run_id: &str) -> ConsoleEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if event.run_id() == Some(run_id) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_echo_run_succeeds_and_is_recorded() -> Result<()> {
    let ws = Workspace::new(&manifest(&[("demo.echo", "echo.sh")]));
    ws.script("echo.sh", "echo done\n");
    let ctx = ws.context();
    ctx.reload_capabilities().await?;

    let mut rx = ctx.subscribe();
    let handle = ctx.submit(RunRequest::new("demo.echo"), Initiator::Cli).await?;
    let run_id = handle.run_id.clone();
    let record = handle.wait().await?;

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.summary, "Run succeeded. Tail: done");
    assert_eq!(record.exit_code(), Some(0));

    assert!(matches!(next_for(&mut rx, &run_id).await, ConsoleEvent::ExecutionStarted { .. }));
    match next_for(&mut rx, &run_id).await {
        ConsoleEvent::Execution { text, .. } => assert_eq!(text, "done\n"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(next_for(&mut rx, &run_id).await.is_terminal_for(&run_id));

    let records = ctx.ledger().read_all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0], record);

    let telemetry = std::fs::read_to_string(ws.temp.path().join("telemetry").join("agent-runner-log.jsonl"))?;
    assert_eq!(telemetry.lines().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_entrypoint_fails_without_started_event() -> Result<()> {
    let ws = Workspace::new(&manifest(&[("demo.missing", "/nonexistent/path")]));
    let ctx = ws.context();
    ctx.reload_capabilities().await?;

    let mut rx = ctx.subscribe();
    let handle = ctx.submit(RunRequest::new("demo.missing"), Initiator::Console).await?;
    let run_id = handle.run_id.clone();
    let record = handle.wait().await?;

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.summary.starts_with("Run failed (exit -1)"));
    assert!(record.metadata.contains_key(metadata_keys::SPAWN_ERROR));

    assert!(matches!(next_for(&mut rx, &run_id).await, ConsoleEvent::Error { .. }));
    match next_for(&mut rx, &run_id).await {
        ConsoleEvent::ExecutionComplete { status, exit_code, .. } => {
            assert_eq!(status, RunStatus::Failed);
            assert_eq!(exit_code, None);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let records = ctx.ledger().read_all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_restart_recovers_interrupted_run() -> Result<()> {
    let ws = Workspace::new(&manifest(&[]));
    let first = ws.context();
    let interrupted = RunRecord::running(
        "r-crashed",
        "demo.sleep",
        timestamp_now(offset_from_minutes(120)),
        None,
        serde_json::Map::new(),
    );
    first.ledger().write_all(&[interrupted]).await?;
    drop(first);

    let ctx = ws.context();
    let actions = ctx.recover().await?;
    assert_eq!(actions.len(), 1);

    let record = ctx.ledger().get("r-crashed").await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.summary, RECOVERED_SUMMARY);
    assert!(record.is_auto_recovered());
    assert!(record.completed.is_some());

    assert!(ctx.recover().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_running_capability() -> Result<()> {
    let ws = Workspace::new(&manifest(&[("demo.sleep", "sleep.sh")]));
    ws.script("sleep.sh", "echo started\nexec sleep 5\n");
    let ctx = ws.context();
    ctx.reload_capabilities().await?;

    let mut rx = ctx.subscribe();
    let handle = ctx.submit(RunRequest::new("demo.sleep"), Initiator::Cli).await?;
    let run_id = handle.run_id.clone();

    // Wait until the script is visibly running
    loop {
        if let ConsoleEvent::Execution { .. } = next_for(&mut rx, &run_id).await {
            break;
        }
    }

    let cancelled = ctx.cancel(&CancelRequest::by_capability("demo.sleep")).await?;
    assert_eq!(cancelled, run_id);

    let record = handle.wait().await?;
    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.summary, "Run cancelled by operator.");
    assert_eq!(record.metadata[metadata_keys::CANCELLED], true);

    // A second cancel finds nothing to stop
    assert!(ctx.cancel(&CancelRequest::by_run(&run_id)).await.is_err());
    assert_eq!(ctx.ledger().get(&run_id).await.unwrap().status, RunStatus::Cancelled);
    Ok(())
}

async fn connect_with_retry(socket: &Path) -> ConsoleClient {
    for _ in 0..200 {
        if let Ok(client) = ConsoleClient::connect(ConsoleClientConfig::with_socket(socket)).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("console never came up at {}", socket.display());
}

#[tokio::test]
async fn test_console_round_trip() -> Result<()> {
    let ws = Workspace::new(&manifest(&[("demo.echo", "echo.sh")]));
    ws.script("echo.sh", "echo \"hello $WORKSPACE_ROOT\"\n");
    let socket = ws.temp.path().join("console.sock");
    let ctx = Arc::new(ws.context());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(daemon::serve(
        Arc::clone(&ctx),
        ConsoleServerConfig::default().with_socket_path(&socket),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut client = connect_with_retry(&socket).await;
    match client.recv_timeout().await?.unwrap() {
        ConsoleEvent::Hello { capabilities, .. } => {
            assert_eq!(capabilities.unwrap().capabilities[0].id, "demo.echo");
        }
        other => panic!("unexpected greeting: {:?}", other),
    }

    client.ping().await?;

    client.send(&RunRequest::new("demo.echo").into()).await?;
    let complete = client
        .recv_until(|event| matches!(event, ConsoleEvent::ExecutionComplete { .. }))
        .await?;
    match complete {
        ConsoleEvent::ExecutionComplete { status, summary, .. } => {
            assert_eq!(status, RunStatus::Succeeded);
            assert!(summary.contains("hello"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    client
        .send(&ConsoleRequest::Run {
            capability_id: "demo.unknown".to_string(),
            prompt: None,
            check: false,
            env_files: Vec::new(),
        })
        .await?;
    let reply = client
        .recv_until(|event| matches!(event, ConsoleEvent::Error { .. }))
        .await?;
    match reply {
        ConsoleEvent::Error { message, capability_id, .. } => {
            assert!(message.contains("demo.unknown"));
            assert_eq!(capability_id.as_deref(), Some("demo.unknown"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    stop_tx.send(()).unwrap();
    server.await.unwrap()?;
    assert!(!socket.exists());
    assert_eq!(ctx.ledger().read_all().await.len(), 1);
    Ok(())
}

async fn follow_to_completion(client: &mut ConsoleClient, run_id: &str) -> ConsoleEvent {
    client
        .recv_until(|event| event.is_terminal_for(run_id))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_submits_follow_their_own_runs() -> Result<()> {
    let ws = Workspace::new(&manifest(&[("demo.echo", "echo.sh")]));
    ws.script("echo.sh", "sleep 0.2\necho \"prompt $CAPABILITY_PAYLOAD\"\n");
    let socket = ws.temp.path().join("console.sock");
    let ctx = Arc::new(ws.context());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(daemon::serve(
        Arc::clone(&ctx),
        ConsoleServerConfig::default().with_socket_path(&socket),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut first = connect_with_retry(&socket).await;
    let mut second = connect_with_retry(&socket).await;
    first.recv_until(|event| matches!(event, ConsoleEvent::Hello { .. })).await?;
    second.recv_until(|event| matches!(event, ConsoleEvent::Hello { .. })).await?;

    let (first_id, second_id) = tokio::join!(
        first.start_run(RunRequest::new("demo.echo").with_prompt("one")),
        second.start_run(RunRequest::new("demo.echo").with_prompt("two")),
    );
    let (first_id, second_id) = (first_id?, second_id?);
    assert_ne!(first_id, second_id);

    for (client, run_id) in [(&mut first, &first_id), (&mut second, &second_id)] {
        match follow_to_completion(client, run_id).await {
            ConsoleEvent::ExecutionComplete {
                run_id: completed,
                status,
                ..
            } => {
                assert_eq!(&completed, run_id);
                assert_eq!(status, RunStatus::Succeeded);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    let first_record = ctx.ledger().get(&first_id).await.unwrap();
    let second_record = ctx.ledger().get(&second_id).await.unwrap();
    assert!(first_record.summary.contains("one"));
    assert!(second_record.summary.contains("two"));

    let rejected = first.start_run(RunRequest::new("demo.unknown")).await;
    assert!(matches!(rejected, Err(CaprunError::Rejected(message)) if message.contains("demo.unknown")));

    stop_tx.send(()).unwrap();
    server.await.unwrap()?;
    Ok(())
}
