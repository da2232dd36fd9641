//! Interactive `run` command: plan, approve, execute, explain.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use colored::*;
use dialoguer::{Confirm, Select};
use eyre::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;

use caprun::daemon::HostContext;
use caprun::domain::{CancelRequest, CapabilitySummary, Initiator, RunRecord, RunRequest, RunStatus, StreamChannel};
use caprun::events::ConsoleEvent;
use caprun::secrets::SecretResolution;

use super::commands::RunArgs;
use super::status_colored;

pub async fn handle_run_command(ctx: &HostContext, args: &RunArgs) -> Result<ExitCode> {
    let recovered = ctx.recover().await.context("Failed to recover interrupted runs")?;
    if !recovered.is_empty() {
        println!(
            "{}",
            format!("Recovered {} interrupted run(s) from a previous session.", recovered.len()).yellow()
        );
    }

    let discovery = ctx
        .reload_capabilities()
        .await
        .context("Failed to discover capabilities")?;

    let capability = match &args.capability {
        Some(id) => match discovery.find(id) {
            Some(capability) => capability.clone(),
            None => {
                eprintln!("{}", format!("Capability {} not found.", id).red());
                return Ok(ExitCode::FAILURE);
            }
        },
        None => choose_capability(&discovery.capabilities)?,
    };

    let check = args.wants_check();
    if check && !capability.supports_check {
        println!(
            "{}",
            "Capability does not support dry-run. Proceeding with execute mode.".yellow()
        );
    }

    let secrets = ctx.secrets().resolve(&capability, &args.env_files).await;
    print_plan(&capability, check, args.prompt.as_deref(), &secrets);

    if args.plan_only {
        println!("{}", "Plan only requested. Exiting without execution.".green());
        return Ok(ExitCode::SUCCESS);
    }

    if args.auto_approve {
        println!("Auto-approve enabled. Continuing without manual confirmation.");
    } else {
        let approved = Confirm::new()
            .with_prompt("Approve execution?")
            .default(false)
            .interact()
            .context("Failed to read approval")?;
        if !approved {
            println!("{}", "Execution cancelled by operator.".yellow());
            return Ok(ExitCode::SUCCESS);
        }
    }

    if args.dry_run_only && !check && capability.supports_check {
        println!("{}", "Dry-run only flag set. Skipping execute mode.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let request = RunRequest {
        capability_id: capability.id.clone(),
        prompt: args.prompt.clone(),
        check: check && capability.supports_check,
        env_files: args.env_files.clone(),
    };

    // Subscribe first so no chunk is missed
    let mut events = ctx.subscribe();
    let handle = ctx.start(&capability, &request, secrets, Initiator::Cli).await;
    let run_id = handle.run_id.clone();

    println!("{}", "Run".cyan());
    println!("  - Run ID: {}", run_id);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.run_id() == Some(run_id.as_str()) => {
                    let done = event.is_terminal_for(&run_id);
                    relay(&event);
                    if done {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => log::warn!("Skipped {} output event(s)", missed),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Interrupted, cancelling run...".yellow());
                if let Err(e) = ctx.cancel(&CancelRequest::by_run(&run_id)).await {
                    log::debug!("Cancel after interrupt: {}", e);
                }
            }
        }
    }

    let record = handle.wait().await.context("Run did not complete")?;
    explain(&record, &ctx.paths().workspace_root, ctx.ledger().path());

    Ok(if record.status == RunStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn choose_capability(capabilities: &[CapabilitySummary]) -> Result<CapabilitySummary> {
    if capabilities.is_empty() {
        bail!("No capabilities are declared in the manifest");
    }

    let items: Vec<String> = capabilities
        .iter()
        .map(|cap| format!("{} - {}", cap.id, cap.summary))
        .collect();
    println!("{}", "Available capabilities:".bold());
    let index = Select::new()
        .with_prompt("Select capability")
        .items(&items)
        .default(0)
        .interact()
        .context("Failed to read selection")?;
    Ok(capabilities[index].clone())
}

fn print_plan(capability: &CapabilitySummary, check: bool, prompt: Option<&str>, secrets: &SecretResolution) {
    println!("{}", "Plan".cyan());
    println!("  - Capability: {}", capability.id);
    println!("  - Summary: {}", capability.summary);
    println!("  - Entrypoint: {}", capability.entrypoint);
    println!("  - Absolute Entrypoint: {}", capability.absolute_entrypoint.display());
    println!(
        "  - Supports check: {}",
        if capability.supports_check { "yes" } else { "no" }
    );
    if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
        println!("  - Prompt: {}", prompt);
    }

    if secrets.requested.is_empty() {
        println!("  - Secrets: none");
    } else {
        println!("  - Secrets: {}", secrets.requested.join(", "));
        if !secrets.loaded.is_empty() {
            println!("    Loaded: {}", secrets.loaded.join(", "));
        }
        if !secrets.missing.is_empty() {
            println!("{}", format!("    Missing: {}", secrets.missing.join(", ")).yellow());
        }
    }

    match (capability.supports_check, check) {
        (true, true) => println!("  - Mode: dry-run (check=true)"),
        (true, false) => println!("  - Mode: execute"),
        (false, _) => println!("  - Mode: execute (check unsupported)"),
    }
}

/// Echo one event of the followed run
fn relay(event: &ConsoleEvent) {
    match event {
        ConsoleEvent::Execution { channel, text, .. } => match channel {
            StreamChannel::Stdout => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            StreamChannel::Stderr => {
                eprint!("{}", text.red());
                let _ = std::io::stderr().flush();
            }
        },
        ConsoleEvent::Error { message, .. } => eprintln!("{} {}", "Error:".red(), message),
        _ => {}
    }
}

fn explain(record: &RunRecord, workspace_root: &Path, ledger_path: &Path) {
    println!("{}", "Explain".cyan());
    if let Some(completed) = &record.completed {
        println!("  - Completed: {}", caprun::id::format_timestamp(completed));
    }
    println!("  - Status: {}", status_colored(record.status));
    println!("  - Summary: {}", record.summary);
    let artefact = ledger_path.strip_prefix(workspace_root).unwrap_or(ledger_path);
    println!("  - Artefact: {}", artefact.display());
}
