//! Console client commands: watch, submit, cancel.

use std::path::PathBuf;
use std::process::ExitCode;

use colored::*;
use eyre::{Context, Result};

use caprun::domain::{CancelRequest, RunRequest, RunStatus, StreamChannel};
use caprun::error::CaprunError;
use caprun::events::ConsoleEvent;
use caprun::ipc::{ConsoleClient, ConsoleClientConfig, ConsoleRequest};

use super::status_colored;

async fn connect(socket: PathBuf) -> Result<ConsoleClient> {
    ConsoleClient::connect(ConsoleClientConfig::with_socket(socket))
        .await
        .context("Is `caprun serve` running?")
}

/// One-line rendering of an event for `watch`
pub fn describe_event(event: &ConsoleEvent) -> String {
    match event {
        ConsoleEvent::Hello { message, capabilities } => match capabilities {
            Some(payload) => format!("{} ({} capabilities)", message, payload.capabilities.len()),
            None => message.clone(),
        },
        ConsoleEvent::Capabilities { payload } => {
            let ids: Vec<&str> = payload.capabilities.iter().map(|c| c.id.as_str()).collect();
            format!("capabilities: {}", ids.join(", "))
        }
        ConsoleEvent::RunAccepted { run_id, capability_id } => {
            format!("{} {} accepted", capability_id, run_id)
        }
        ConsoleEvent::ExecutionStarted { run_id, capability_id } => {
            format!("{} {} started", capability_id, run_id)
        }
        ConsoleEvent::Execution {
            run_id, channel, text, ..
        } => format!("{} [{}] {}", run_id, channel, text.trim_end()),
        ConsoleEvent::ExecutionComplete {
            run_id,
            capability_id,
            status,
            summary,
            ..
        } => format!("{} {} {}: {}", capability_id, run_id, status, summary),
        ConsoleEvent::Error { message, .. } => format!("error: {}", message),
        ConsoleEvent::Pong => "pong".to_string(),
    }
}

pub async fn handle_watch_command(socket: PathBuf) -> Result<ExitCode> {
    let mut client = connect(socket).await?;
    println!("{} {}", "Watching".cyan(), client.socket_path().display());

    loop {
        tokio::select! {
            event = client.recv() => match event? {
                Some(event @ ConsoleEvent::Error { .. }) => println!("{}", describe_event(&event).red()),
                Some(event) => println!("{}", describe_event(&event)),
                None => {
                    println!("{}", "Host closed the connection.".yellow());
                    return Ok(ExitCode::SUCCESS);
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(ExitCode::SUCCESS),
        }
    }
}

/// Submit a run and follow it until it completes
pub async fn handle_submit_command(socket: PathBuf, request: RunRequest) -> Result<ExitCode> {
    let mut client = connect(socket).await?;
    let run_id = match client.start_run(request).await {
        Ok(run_id) => run_id,
        Err(CaprunError::Rejected(message)) => {
            eprintln!("{} {}", "Error:".red(), message);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("Host did not accept the run"),
    };
    println!("{} {}", "Started".cyan(), run_id);

    while let Some(event) = client.recv().await? {
        if event.run_id() != Some(run_id.as_str()) {
            continue;
        }
        match event {
            ConsoleEvent::Execution { channel, text, .. } => match channel {
                StreamChannel::Stdout => print!("{}", text),
                StreamChannel::Stderr => eprint!("{}", text.red()),
            },
            ConsoleEvent::Error { message, .. } => eprintln!("{} {}", "Error:".red(), message),
            ConsoleEvent::ExecutionComplete { status, summary, .. } => {
                println!("{} {}", status_colored(status), summary);
                return Ok(if status == RunStatus::Succeeded {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                });
            }
            _ => {}
        }
    }

    eprintln!("{}", "Host closed the connection before the run completed.".red());
    Ok(ExitCode::FAILURE)
}

pub async fn handle_cancel_command(socket: PathBuf, request: CancelRequest) -> Result<ExitCode> {
    if request.is_empty() {
        eyre::bail!("Pass --run-id or --capability");
    }

    let mut client = connect(socket).await?;
    client.send(&ConsoleRequest::from(request.clone())).await?;

    let reply = client
        .recv_until(|event| match event {
            ConsoleEvent::Error {
                run_id, capability_id, ..
            } => *run_id == request.run_id && *capability_id == request.capability_id,
            ConsoleEvent::ExecutionComplete {
                run_id,
                capability_id,
                status,
                ..
            } => {
                *status == RunStatus::Cancelled
                    && (request.run_id.as_deref() == Some(run_id.as_str())
                        || request.capability_id.as_deref() == Some(capability_id.as_str()))
            }
            _ => false,
        })
        .await?;

    match reply {
        ConsoleEvent::ExecutionComplete { run_id, .. } => {
            println!("{} {}", "Cancelled".yellow(), run_id);
            Ok(ExitCode::SUCCESS)
        }
        other => {
            eprintln!("{}", describe_event(&other).red());
            Ok(ExitCode::FAILURE)
        }
    }
}
