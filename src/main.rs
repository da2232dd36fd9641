use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

mod cli;

use caprun::config::{Config, HostPaths};
use caprun::daemon::{self, HostContext, RecoveryAction};
use caprun::domain::{CancelRequest, RunRequest, RunStatus};
use caprun::ipc::ConsoleServerConfig;
use cli::Cli;
use cli::commands::Commands;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("caprun")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("caprun.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<ExitCode> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let paths = HostPaths::resolve(config)?;
    if cli.is_verbose() {
        println!("Workspace: {}", paths.workspace_root.display());
        println!("Ledger: {}", paths.ledger_file.display());
    }
    let socket_path = paths.socket_path.clone();
    let ctx = HostContext::new(config, paths);

    match &cli.command {
        Commands::List => handle_list_command(&ctx).await,
        Commands::Run(args) => cli::run::handle_run_command(&ctx, args).await,
        Commands::Runs { status, limit } => handle_runs_command(&ctx, status.as_deref(), *limit).await,
        Commands::Show { run_id } => handle_show_command(&ctx, run_id).await,
        Commands::Recover => handle_recover_command(&ctx).await,
        Commands::Serve { socket } => {
            let socket = socket.clone().unwrap_or(socket_path);
            handle_serve_command(ctx, config, socket).await
        }
        Commands::Watch { socket } => cli::console::handle_watch_command(socket.clone().unwrap_or(socket_path)).await,
        Commands::Submit {
            capability,
            prompt,
            check,
            env_files,
            socket,
        } => {
            let mut request = RunRequest::new(capability.clone())
                .with_check(*check)
                .with_env_files(env_files.clone());
            if let Some(prompt) = prompt {
                request = request.with_prompt(prompt.clone());
            }
            cli::console::handle_submit_command(socket.clone().unwrap_or(socket_path), request).await
        }
        Commands::Cancel {
            run_id,
            capability,
            socket,
        } => {
            let request = CancelRequest {
                run_id: run_id.clone(),
                capability_id: capability.clone(),
            };
            cli::console::handle_cancel_command(socket.clone().unwrap_or(socket_path), request).await
        }
    }
}

async fn handle_list_command(ctx: &HostContext) -> Result<ExitCode> {
    info!("Listing capabilities");
    let payload = ctx
        .reload_capabilities()
        .await
        .context("Failed to discover capabilities")?;

    println!("{} {}", "Manifest:".bold(), payload.manifest_path.display());
    for cap in &payload.capabilities {
        let check = if cap.supports_check { " [check]".dimmed().to_string() } else { String::new() };
        println!("- {}: {}{}", cap.id.green(), cap.summary, check);
        if let Some(description) = &cap.description {
            println!("    {}", description);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_runs_command(ctx: &HostContext, status: Option<&str>, limit: usize) -> Result<ExitCode> {
    info!("Listing runs - status: {:?}, limit: {}", status, limit);
    let status = status
        .map(|s| s.parse::<RunStatus>())
        .transpose()
        .map_err(|e| eyre::eyre!(e))?;

    let records = cli::select_runs(ctx.ledger().read_all().await, status, limit);
    if records.is_empty() {
        println!("{}", "No runs recorded.".yellow());
    }
    for record in &records {
        println!("{}", cli::format_run_line(record));
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_show_command(ctx: &HostContext, run_id: &str) -> Result<ExitCode> {
    info!("Showing run: {}", run_id);
    match ctx.ledger().get(run_id).await {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        None => eyre::bail!("Run {} not found in {}", run_id, ctx.ledger().path().display()),
    }
}

async fn handle_recover_command(ctx: &HostContext) -> Result<ExitCode> {
    info!("Running recovery sweep");
    let actions = ctx.recover().await.context("Recovery sweep failed")?;
    if actions.is_empty() {
        println!("{}", "Nothing to recover.".green());
    }
    for action in &actions {
        match action {
            RecoveryAction::MarkedFailed { run_id } => println!("{} {}", "Marked failed:".yellow(), run_id),
            RecoveryAction::Skipped { run_id } => println!("{} {}", "Already recovered:".dimmed(), run_id),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_serve_command(ctx: HostContext, config: &Config, socket: PathBuf) -> Result<ExitCode> {
    info!("Serving console on {}", socket.display());
    println!("{} {}", "Serving console on".cyan(), socket.display());

    let server_config = ConsoleServerConfig::default()
        .with_socket_path(&socket)
        .with_max_clients(config.console.max_clients);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    daemon::serve(Arc::new(ctx), server_config, shutdown)
        .await
        .context("Console server failed")?;
    println!("{}", "Console stopped.".cyan());
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")
}
