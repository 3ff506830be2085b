//! # council-monitor
//!
//! Terminal monitor for a multi-agent conversation: follows the stream,
//! prints the ordered transcript and keeps the conversation moving.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use council_core::settings::{load_settings, load_settings_from_path};
use council_core::timestamp::parse_timestamp;
use council_core::{ConnectionState, ConversationId, Mode, MonitorSettings};
use council_engine::{HttpOrchestrator, Monitor, MonitorConfig, MonitorUpdate, Retarget, UserAction};
use council_stream::WsConnector;
use council_telemetry::{init_telemetry, TelemetryConfig};

/// Council conversation monitor.
#[derive(Parser, Debug)]
#[command(name = "council-monitor", about = "Follow a council conversation and drive its turns")]
struct Cli {
    /// Stream endpoint (e.g. wss://host/stream).
    #[arg(long)]
    stream_url: Option<String>,

    /// Orchestrator endpoint receiving continuation requests.
    #[arg(long)]
    orchestrator_url: Option<String>,

    /// Conversation id. Defaults to today's conversation.
    #[arg(long)]
    conversation: Option<String>,

    /// Initial mode: auto or halt.
    #[arg(long)]
    mode: Option<Mode>,

    /// Settings file (defaults to ~/.council/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut MonitorSettings) {
        if let Some(url) = &self.stream_url {
            settings.stream.endpoint = url.clone();
        }
        if let Some(url) = &self.orchestrator_url {
            settings.orchestrator.url = url.clone();
        }
        if let Some(id) = &self.conversation {
            settings.conversation.id = Some(id.clone());
        }
        if let Some(mode) = self.mode {
            settings.scheduler.initial_mode = mode;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);

    let telemetry = init_telemetry(
        TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)
            .with_module_levels(&settings.logging.modules),
    );

    let orchestrator = HttpOrchestrator::from_settings(&settings.orchestrator)
        .context("Invalid orchestrator endpoint")?;
    let config = MonitorConfig::from_settings(&settings);
    tracing::info!(
        stream = %config.target.stream_endpoint,
        conversation_id = %config.target.conversation_id,
        orchestrator = %orchestrator.endpoint(),
        agents = ?orchestrator.agents().collect::<Vec<_>>(),
        mode = %config.initial_mode,
        "Starting council monitor"
    );

    let metrics = telemetry.metrics();
    let (monitor, mut updates) = Monitor::new(
        config,
        Arc::new(WsConnector),
        Arc::new(orchestrator),
        Arc::clone(&metrics),
    );

    let (actions, actions_rx) = mpsc::channel(64);
    tokio::spawn(read_commands(actions.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = actions.send(UserAction::Shutdown).await;
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if let Some(line) = render_update(&update) {
                println!("{line}");
            }
        }
    });

    monitor.run(actions_rx).await;
    let _ = printer.await;

    tracing::info!(metrics = ?metrics.snapshot(), "Shutting down");
    Ok(())
}

async fn read_commands(actions: mpsc::Sender<UserAction>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(action)) => {
                let stop = action == UserAction::Shutdown;
                if actions.send(action).await.is_err() || stop {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{message}"),
        }
    }
    let _ = actions.send(UserAction::Shutdown).await;
}

/// Map one input line to an action. `Ok(None)` for blank lines. Manual
/// text is sent as typed.
fn parse_command(raw: &str) -> Result<Option<UserAction>, String> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(UserAction::SendManual(raw.to_string())));
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let action = match command {
        "/auto" => UserAction::SetMode(Mode::Auto),
        "/halt" => UserAction::SetMode(Mode::Halt),
        "/clear" => UserAction::Clear,
        "/draft" => UserAction::SetDraft(rest.to_string()),
        "/conversation" if rest.is_empty() => {
            return Err("usage: /conversation <id>".into());
        }
        "/conversation" => UserAction::Retarget(Retarget::conversation(ConversationId::from_raw(rest))),
        "/stream" if rest.is_empty() => return Err("usage: /stream <url>".into()),
        "/stream" => UserAction::Retarget(Retarget::endpoint(rest)),
        "/event" if rest.is_empty() => return Err("usage: /event <text>".into()),
        "/event" => UserAction::BroadcastEvent(rest.to_string()),
        "/to" => match rest.split_once(char::is_whitespace) {
            Some((agent, message)) if !message.trim().is_empty() => UserAction::SendToAgent {
                agent: agent.to_string(),
                message: message.trim().to_string(),
            },
            _ => return Err("usage: /to <agent> <message>".into()),
        },
        "/health" => UserAction::CheckHealth,
        "/quit" => UserAction::Shutdown,
        other => return Err(format!("unknown command {other}")),
    };
    Ok(Some(action))
}

fn render_update(update: &MonitorUpdate) -> Option<String> {
    let line = match update {
        MonitorUpdate::Accepted { entry, .. } => {
            let when = parse_timestamp(&entry.message.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("[{when}] {}: {}", entry.message.actor_name, entry.message.content)
        }
        MonitorUpdate::Status(state) => match state {
            ConnectionState::Connected => "-- stream connected".to_string(),
            ConnectionState::Connecting => "-- stream connecting".to_string(),
            ConnectionState::Disconnected => "-- stream disconnected".to_string(),
        },
        MonitorUpdate::Pending(true) => "-- continuation pending".to_string(),
        MonitorUpdate::Pending(false) => return None,
        MonitorUpdate::ModeChanged(mode) => format!("-- mode: {mode}"),
        MonitorUpdate::Dispatched { kind, .. } => format!("-- {kind} continuation sent"),
        MonitorUpdate::Finished { result: Ok(()), .. } => return None,
        MonitorUpdate::Finished { kind, result: Err(e), .. } => {
            format!("-- {kind} continuation failed: {e}")
        }
        MonitorUpdate::Rejected(e) => format!("-- not sent: {e}"),
        MonitorUpdate::Cleared => "-- transcript cleared".to_string(),
        MonitorUpdate::Retargeted(target) => format!(
            "-- following conversation {} on {}",
            target.conversation_id, target.stream_endpoint
        ),
        MonitorUpdate::Health(Ok(())) => "-- orchestrator healthy".to_string(),
        MonitorUpdate::Health(Err(e)) => format!("-- orchestrator unhealthy: {e}"),
        MonitorUpdate::EventBroadcast(Ok(())) => "-- world event sent".to_string(),
        MonitorUpdate::EventBroadcast(Err(e)) => format!("-- world event failed: {e}"),
        MonitorUpdate::AgentReply { agent, result } => match result {
            Ok(Some(reply)) => format!("<{agent}> {reply}"),
            Ok(None) => format!("-- message delivered to {agent}"),
            Err(e) => format!("-- message to {agent} failed: {e}"),
        },
    };
    Some(line)
}
