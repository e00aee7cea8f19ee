//! Interactive console: the terminal control surface for a session.

use crate::config::Config;
use crate::session::{Event, SessionManager, SessionState};
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  <text>          send a user message and request a response
  /event <json>   send a raw client event
  /start          start a new session
  /stop           stop the current session
  /history [n]    show the n most recent events (default 10)
  /diag           show recorded diagnostics
  /help           show this help
  /quit           stop and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Text(String),
    Event(String),
    Start,
    Stop,
    History(usize),
    Diagnostics,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return ConsoleCommand::Text(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "event" if !rest.is_empty() => ConsoleCommand::Event(rest.to_string()),
        "start" => ConsoleCommand::Start,
        "stop" => ConsoleCommand::Stop,
        "history" => ConsoleCommand::History(rest.parse().unwrap_or(10)),
        "diag" => ConsoleCommand::Diagnostics,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => ConsoleCommand::Unknown(other.to_string()),
    }
}

/// One-line rendering of an event for the log
pub fn format_event(direction: &str, event: &Event) -> String {
    let kind = event.kind().unwrap_or("unknown");
    let time = event.timestamp().unwrap_or("--:--:--");
    match event.transcript() {
        Some(text) => format!("{} {} {}: {}", time, direction, kind, text),
        None => format!(
            "{} {} {} ({})",
            time,
            direction,
            kind,
            event.event_id().unwrap_or("-")
        ),
    }
}

pub async fn run_console(config: Config) -> Result<()> {
    let manager = crate::build_session_manager(&config)?;

    let mut events = manager
        .subscribe()
        .context("Inbound event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("{}", format_event("←", &event));
        }
    });

    let mut state_rx = manager.watch_state();
    let state_printer = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            match state {
                SessionState::Starting => println!("● connecting..."),
                SessionState::Active => println!("● session active"),
                SessionState::Idle => println!("○ session stopped"),
            }
        }
    });

    println!("{}\n", HELP);
    start_session(&manager).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };

        let Some(line) = line else { break };

        match parse_command(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Text(text) => {
                if manager.send_text_message(&text).await {
                    println!("→ {}", text);
                } else {
                    println!("✗ Not connected (use /start)");
                }
            }
            ConsoleCommand::Event(json) => match Event::parse(&json) {
                Ok(event) => match manager.send_event(event).await {
                    Some(sent) => println!("{}", format_event("→", &sent)),
                    None => println!("✗ Not connected (use /start)"),
                },
                Err(e) => println!("✗ Invalid event: {}", e),
            },
            ConsoleCommand::Start => start_session(&manager).await,
            ConsoleCommand::Stop => manager.stop().await,
            ConsoleCommand::History(count) => {
                for event in manager.history().iter().take(count).rev() {
                    println!("  {}", format_event("·", event));
                }
            }
            ConsoleCommand::Diagnostics => {
                for diagnostic in manager.diagnostics() {
                    println!(
                        "  {} {}",
                        diagnostic.at.format("%H:%M:%S"),
                        diagnostic.message
                    );
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(name) => println!("Unknown command: /{} (try /help)", name),
        }
    }

    manager.stop().await;
    printer.abort();
    state_printer.abort();
    Ok(())
}

async fn start_session(manager: &SessionManager) {
    if let Err(e) = manager.start().await {
        println!("✗ {}", e);
    }
}
