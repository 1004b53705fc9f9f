//! Line-oriented console frontend.
//!
//! Reads commands from stdin and forwards them over the bridge, printing
//! whatever the backend pushes back. It holds no session state of its own.

use castline_bridge::config::Config;
use castline_bridge::notification::NotificationType;
use castline_bridge::{MessageFromBackend, MessageToBackend};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "commands: start | stop | status | chat <posts> | url <ingest-url> | quit";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Start,
    Stop,
    Status,
    Chat(u32),
    Url(String),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(HELP.to_string());
        };
        let argument = parts.next();
        match (name, argument) {
            ("start", None) => Ok(Self::Start),
            ("stop", None) => Ok(Self::Stop),
            ("status", None) => Ok(Self::Status),
            ("help", None) => Ok(Self::Help),
            ("quit" | "exit", None) => Ok(Self::Quit),
            ("chat", Some(count)) => count
                .parse()
                .map(Self::Chat)
                .map_err(|_| format!("not a post count: {count}")),
            ("url", Some(url)) => Ok(Self::Url(url.to_string())),
            _ => Err(format!("unknown command `{}`, {HELP}", line.trim())),
        }
    }
}

/// Points the first connection at `url` and enables it, adding one if the
/// configuration has none.
fn with_ingest_url(mut config: Config, url: String) -> Config {
    match config.connections.first_mut() {
        Some(connection) => {
            connection.url = url;
            connection.enabled = true;
        }
        None => config.connections.push(castline_bridge::config::ConnectionConfig {
            url,
            ..Default::default()
        }),
    }
    config
}

fn print_message(message: &MessageFromBackend) {
    match message {
        MessageFromBackend::NotificationMessage(notification) => {
            let label = match notification.notification_type {
                NotificationType::Info => "info",
                NotificationType::Success => "ok",
                NotificationType::Warning => "warning",
                NotificationType::Error => "error",
            };
            println!("[{label}] {}", notification.message);
        }
        MessageFromBackend::ConfigurationResponse(config) => match config.active_connection() {
            Some(connection) => {
                println!("active connection: {} ({})", connection.name, connection.url)
            }
            None => println!("no enabled connection"),
        },
        MessageFromBackend::SessionUpdate(snapshot) => {
            let name = snapshot.connection_name.as_deref().unwrap_or("-");
            println!(
                "session: {} via {name} (retries: {})",
                snapshot.phase, snapshot.retry_count
            );
        }
        MessageFromBackend::MetricsUpdate(metrics) => {
            if metrics.uptime.is_empty() {
                return;
            }
            let fps = if metrics.fps.is_empty() { "-" } else { metrics.fps.as_str() };
            println!(
                "{} | up {} | {} | {fps} fps | {:.1} chat/s",
                metrics.current_time,
                metrics.uptime,
                metrics.throughput,
                metrics.chat_posts_per_second
            );
        }
    }
}

async fn serve(
    mut rx: mpsc::Receiver<MessageFromBackend>,
    tx: mpsc::Sender<MessageToBackend>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut config: Option<Config> = None;

    tx.send(MessageToBackend::ConfigurationRequest).await?;
    println!("{HELP}");

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    log::warn!("Backend went away");
                    break;
                };
                if let MessageFromBackend::ConfigurationResponse(latest) = &message {
                    config = Some(latest.clone());
                }
                print_message(&message);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let message = match Command::parse(&line) {
                    Ok(Command::Start) => MessageToBackend::StartStream,
                    Ok(Command::Stop) => MessageToBackend::StopStream,
                    Ok(Command::Status) => MessageToBackend::SessionStatusRequest,
                    Ok(Command::Chat(count)) => MessageToBackend::ChatPostsReceived(count),
                    Ok(Command::Url(url)) => {
                        let base = config.clone().unwrap_or_default();
                        MessageToBackend::UpdateConfiguration(with_ingest_url(base, url))
                    }
                    Ok(Command::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Ok(Command::Quit) => break,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                tx.send(message).await?;
            }
        }
    }

    Ok(())
}

/// Runs the console until stdin closes or `quit` is entered. Dropping the
/// sender on return is what tells the backend to shut down.
pub fn run(
    rx: mpsc::Receiver<MessageFromBackend>,
    tx: mpsc::Sender<MessageToBackend>,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(rx, tx));
    // stdin reads park a blocking thread that would otherwise hold up the drop
    runtime.shutdown_background();
    result
}
