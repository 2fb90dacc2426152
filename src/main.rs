use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::Level;

use murmur_agent::{DemoAgent, HttpAgent, StaticSources};
use murmur_client::{ChatSession, HttpTransport, RandomPacer, SessionUpdate};
use murmur_core::agent::AgentExecutor;
use murmur_core::Role;
use murmur_server::{AppState, ServerConfig};
use murmur_settings::MurmurSettings;
use murmur_telemetry::{init_telemetry, murmur_dir, TelemetryConfig, TelemetryGuard};

#[derive(Parser)]
#[command(name = "murmur", version, about = "Streaming chat with citations and step replay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Upstream agent runtime base URL.
        #[arg(long)]
        agent_url: Option<String>,
        /// Answer with the built-in demo agent even if an agent URL is set.
        #[arg(long)]
        demo: bool,
    },
    /// Chat with a running server from the terminal.
    Chat {
        #[arg(long)]
        server_url: Option<String>,
        /// Ask for the whole run and replay its tool steps.
        #[arg(long)]
        steps: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = murmur_settings::load_settings().context("failed to load settings")?;
    let _telemetry = telemetry(&settings);

    match cli.command {
        Command::Serve {
            host,
            port,
            agent_url,
            demo,
        } => serve(settings, host, port, agent_url, demo).await,
        Command::Chat { server_url, steps } => chat(settings, server_url, steps).await,
    }
}

fn telemetry(settings: &MurmurSettings) -> TelemetryGuard {
    let logging = &settings.logging;
    let level = logging.level.parse::<Level>().ok();
    let guard = init_telemetry(TelemetryConfig {
        log_level: level.unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        json: logging.json,
        log_to_sqlite: logging.persist,
        log_db_path: logging
            .db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| murmur_dir().join("logs.db")),
    });
    if level.is_none() {
        tracing::warn!(level = %logging.level, "unknown log level, using info");
    }
    guard
}

async fn serve(
    settings: MurmurSettings,
    host: Option<String>,
    port: Option<u16>,
    agent_url: Option<String>,
    demo: bool,
) -> anyhow::Result<()> {
    let config = ServerConfig {
        host: host.unwrap_or(settings.server.host),
        port: port.unwrap_or(settings.server.port),
    };

    let upstream = agent_url.or(settings.agent.url).filter(|_| !demo);
    let state = match upstream {
        Some(url) => {
            let mut agent = HttpAgent::new(url).context("invalid agent URL")?;
            if let Some(key) = settings.agent.api_key {
                agent = agent.with_api_key(SecretString::from(key));
            }
            tracing::info!(upstream = %agent.base_url(), "using upstream agent");
            AppState::new(Arc::new(agent) as Arc<dyn AgentExecutor>)
        }
        None => {
            tracing::info!("no agent URL configured, using the demo agent");
            let agent = DemoAgent::new().with_token_delay(Duration::from_millis(60));
            AppState::new(Arc::new(agent)).with_sources(Arc::new(StaticSources::demo()))
        }
    };

    let handle = murmur_server::start(config, state)
        .await
        .context("failed to start server")?;
    println!("murmur listening on {}", handle.base_url());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn chat(settings: MurmurSettings, server_url: Option<String>, steps: bool) -> anyhow::Result<()> {
    let client = settings.client;
    let url = server_url.unwrap_or(client.server_url);
    let transport = HttpTransport::new(&url).context("failed to build HTTP transport")?;
    let mut session = ChatSession::new(Arc::new(transport))
        .with_pacer(Arc::new(RandomPacer::from_millis(
            client.replay_min_ms,
            client.replay_max_ms,
        )))
        .with_show_intermediate_steps(steps || client.show_intermediate_steps);

    let printer = tokio::spawn(print_updates(session.subscribe()));
    println!("connected to {url}; /steps toggles step replay, /thread shows the last exchange, /quit exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/steps" => {
                let on = !session.show_intermediate_steps();
                session.set_show_intermediate_steps(on)?;
                println!("step replay {}", if on { "on" } else { "off" });
            }
            "/thread" => show_last_exchange(&session),
            _ if line.starts_with('/') => println!("unknown command {line}"),
            _ => {
                if let Err(e) = session.send(line).await {
                    // Already reported through the update channel.
                    tracing::debug!(error = %e, "turn failed");
                }
            }
        }
    }

    drop(session);
    if let Err(e) = printer.await {
        bail!("update printer failed: {e}");
    }
    Ok(())
}

/// Branch the default thread off the latest answer and print it.
fn show_last_exchange(session: &ChatSession) {
    let Some(answer) = session
        .transcript()
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
    else {
        println!("no answer yet");
        return;
    };
    let thread = session.open_default_thread(&answer.id, "last exchange");
    let view = session.thread_view(&thread);
    if view.is_empty() {
        println!("the latest answer has no question in front of it");
    }
    for message in view {
        println!("  {}: {}", message.role.as_str(), message.content);
    }
}

async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>) {
    let mut display = Display::default();
    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Err(e) = display.show(update) {
                    tracing::warn!(error = %e, "failed to write to stdout");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "display fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Terminal rendering of session updates.
#[derive(Default)]
struct Display {
    /// Tokens of the current reply have been printed without a newline.
    streaming: bool,
}

impl Display {
    fn show(&mut self, update: SessionUpdate) -> std::io::Result<()> {
        use std::io::Write;

        let mut out = std::io::stdout().lock();
        match update {
            SessionUpdate::AssistantStarted { .. } => {
                self.streaming = true;
                write!(out, "< ")?;
            }
            SessionUpdate::Token { text, .. } => write!(out, "{text}")?,
            SessionUpdate::Step { step, .. } => match &step.action {
                Some(call) => writeln!(out, "  [{}] {} -> {}", call.name, call.args, step.observation)?,
                None => writeln!(out, "  [-] -> {}", step.observation)?,
            },
            SessionUpdate::Sources { sources, .. } => {
                self.end_line(&mut out)?;
                for (n, source) in sources.iter().enumerate() {
                    let lines = source
                        .lines()
                        .map(|l| format!(" (lines {}-{})", l.from, l.to))
                        .unwrap_or_default();
                    writeln!(out, "  [{}]{lines} {}", n + 1, source.page_content)?;
                }
            }
            SessionUpdate::AssistantMessage(message) => {
                if self.streaming {
                    self.end_line(&mut out)?;
                } else {
                    writeln!(out, "< {}", message.content)?;
                }
            }
            SessionUpdate::Failed { error } => {
                self.end_line(&mut out)?;
                writeln!(out, "! {error}")?;
            }
            SessionUpdate::Idle => self.streaming = false,
            SessionUpdate::UserMessage(_) => {}
        }
        out.flush()
    }

    fn end_line(&mut self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        if std::mem::take(&mut self.streaming) {
            writeln!(out)?;
        }
        Ok(())
    }
}
