//! Relay - chat-to-Claude-Code session relay
//!
//! CLI entry point: an interactive console transport over the session
//! orchestrator, plus `relay doctor`.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use relay::claude::process::ClaudeAgent;
use relay::cli::{
    format_status, parse_command, render_diagnostic_report, ConsoleCommand, ConsoleTransport,
    EventRenderer, HELP,
};
use relay::config::RelayConfig;
use relay::doctor::{diagnose, BinaryProbe};
use relay::log::{init_tracing, TranscriptLogger, TranscriptRecorder};
use relay::session::orchestrator::{SessionEvent, SessionOrchestrator};
use relay::session::permission::PermissionCoordinator;
use relay::session::store::{FileSessionStore, MemorySessionStore, SessionStore};

/// How long to wait for running exchanges to report completion on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Relay a chat session to Claude Code
///
/// Reads chat input from the terminal, runs it through Claude Code and asks
/// for approval before gated tools run.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the relay.toml configuration file
    #[arg(long, global = true, default_value = "relay.toml")]
    config: PathBuf,

    /// Session key for the console chat
    #[arg(long, default_value = "console")]
    session: String,

    /// Working directory for new sessions (overrides the config)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the Claude Code installation and configured paths
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = RelayConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?
        .with_env_overrides();
    if let Some(cwd) = cli.cwd {
        config.agent.working_dir = cwd;
    }

    match cli.command {
        Some(Command::Doctor) => {
            run_doctor(&config);
            Ok(())
        }
        None => run_console(config, &cli.session).await,
    }
}

fn run_doctor(config: &RelayConfig) {
    let report = diagnose(config, &BinaryProbe::from_env());
    eprintln!("{}", render_diagnostic_report(&report));
    if report.error_count() > 0 {
        std::process::exit(1);
    }
}

/// The executable to spawn: the resolved location when one is found,
/// otherwise the configured value so the spawn error names it.
fn agent_binary(configured: &str, probe: &BinaryProbe) -> String {
    probe.resolve(configured).map_or_else(
        || configured.to_string(),
        |location| location.path.display().to_string(),
    )
}

fn open_store(config: &RelayConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match &config.store.dir {
        Some(dir) => Arc::new(
            FileSessionStore::open(dir)
                .with_context(|| format!("Failed to open session store at '{}'", dir.display()))?,
        ),
        None => Arc::new(MemorySessionStore::new()),
    };
    Ok(store)
}

async fn run_console(config: RelayConfig, session_key: &str) -> Result<()> {
    let binary = agent_binary(&config.agent.binary, &BinaryProbe::from_env());
    let store = open_store(&config)?;
    let transcript = config
        .log
        .transcript_dir
        .as_ref()
        .map(TranscriptLogger::new)
        .transpose()
        .context("Failed to initialize transcript log")?;

    let permissions = Arc::new(
        PermissionCoordinator::new(Arc::new(ConsoleTransport::new()))
            .with_timeout(config.permissions.approval_timeout()),
    );
    let (orchestrator, events) = SessionOrchestrator::new(
        Arc::new(ClaudeAgent::new(binary.clone())),
        Arc::clone(&store),
        permissions,
        config.orchestrator_settings(),
    );

    tracing::info!(binary = %binary, session_key, "relay ready");
    let printer = tokio::spawn(print_events(events, EventRenderer::new(store), transcript));

    eprintln!(
        "{} session '{}' in {}. Type a message, or /help.",
        "relay".bold().cyan(),
        session_key,
        config.agent.working_dir.display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        if !handle_command(&orchestrator, session_key, parse_command(&line)).await {
            break;
        }
    }

    orchestrator.shutdown();
    drop(orchestrator);
    if tokio::time::timeout(SHUTDOWN_GRACE, printer).await.is_err() {
        tracing::warn!("exchanges did not finish before exit");
    }
    Ok(())
}

/// Execute one console command. Returns false when the console should exit.
async fn handle_command(
    orchestrator: &SessionOrchestrator,
    session_key: &str,
    command: ConsoleCommand,
) -> bool {
    let result = match command {
        ConsoleCommand::Input(text) => orchestrator.add_input(session_key, text.into()).await,
        ConsoleCommand::Abort => {
            if !orchestrator.abort(session_key) {
                eprintln!("{}", "Nothing is running.".dimmed());
            }
            Ok(())
        }
        ConsoleCommand::Status => print_status(orchestrator, session_key).await,
        ConsoleCommand::Approve(id) => {
            settle(orchestrator, &id, true);
            Ok(())
        }
        ConsoleCommand::Deny(id) => {
            settle(orchestrator, &id, false);
            Ok(())
        }
        ConsoleCommand::Mode(mode) => orchestrator
            .set_permission_mode(session_key, mode)
            .await
            .map(|()| eprintln!("Permission mode set to {mode} from the next exchange on.")),
        ConsoleCommand::Reset => orchestrator
            .reset(session_key)
            .await
            .map(|()| eprintln!("Session '{session_key}' reset.")),
        ConsoleCommand::Help => {
            eprintln!("{HELP}");
            Ok(())
        }
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Empty => Ok(()),
        ConsoleCommand::Invalid(message) => {
            eprintln!("{}", message.yellow());
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{} {err:#}", "Error:".red().bold());
    }
    true
}

fn settle(orchestrator: &SessionOrchestrator, request_id: &str, approved: bool) {
    if !orchestrator.settle(request_id, approved) {
        eprintln!(
            "{}",
            format!("No pending request '{request_id}'.").yellow()
        );
    }
}

async fn print_status(orchestrator: &SessionOrchestrator, session_key: &str) -> Result<()> {
    let session = orchestrator.session(session_key).await?;
    let pending = orchestrator.permissions().pending_for(session_key);
    eprintln!(
        "{}",
        format_status(
            session_key,
            orchestrator.is_running(session_key),
            session.as_ref(),
            &pending
        )
    );
    Ok(())
}

async fn print_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut renderer: EventRenderer,
    transcript: Option<TranscriptLogger>,
) {
    let mut recorder = TranscriptRecorder::new();
    while let Some(event) = events.recv().await {
        for line in renderer.render(&event).await {
            eprintln!("{line}");
        }

        let Some(record) = recorder.observe(&event) else {
            continue;
        };
        if let Some(logger) = &transcript {
            if let Err(err) = logger.append(&record) {
                tracing::warn!(error = %err, "failed to append transcript record");
            }
        }
    }
}
