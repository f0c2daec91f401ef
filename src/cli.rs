//! Command-line interface: REPL and replay files
//!
//! Both feed raw messages into a session without a device attached. Messages
//! are written as hex bytes (`90 5E 7F`); the REPL also accepts page commands.

use anyhow::{Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

use crate::message::{describe, format_hex, parse_hex};
use crate::session::Session;
use crate::shadow::RecordingSink;

/// One REPL input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message(Vec<u8>),
    Pages,
    Page(String),
    Next,
    Prev,
    Tick,
    Apply,
    Controls,
    Help,
    Exit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        Ok(match word.to_ascii_lowercase().as_str() {
            "" => Command::Empty,
            "exit" | "quit" => Command::Exit,
            "help" | "?" => Command::Help,
            "pages" => Command::Pages,
            "page" if !rest.is_empty() => Command::Page(rest.to_string()),
            "next" => Command::Next,
            "prev" => Command::Prev,
            "tick" => Command::Tick,
            "apply" => Command::Apply,
            "controls" => Command::Controls,
            _ => Command::Message(parse_hex(line).context("Unknown command")?),
        })
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  {}          send a raw message", "90 5E 7F".cyan());
    println!("  {}             list pages", "pages".cyan());
    println!("  {}   switch page", "page <name|n>".cyan());
    println!("  {}        navigate pages", "next / prev".cyan());
    println!("  {}              run a tick", "tick".cyan());
    println!("  {}             flush the display state", "apply".cyan());
    println!("  {}          list controls on the active page", "controls".cyan());
    println!("  {}              leave", "exit".cyan());
}

/// Feed one raw message and print what happened
pub fn feed(session: &mut Session, raw: &[u8]) {
    let stamp = chrono::Local::now().format("%H:%M:%S%.3f");

    match session.on_message(raw) {
        None => println!("{} {} {}", stamp.to_string().dimmed(), format_hex(raw), "(no control)".dimmed()),
        Some(event) => {
            let name = session
                .matcher()
                .control(event.mapping.control())
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            let status = if event.handled {
                "handled".green()
            } else {
                "unbound".yellow()
            };
            println!(
                "{} {} → {} = {:.3} [{}]",
                stamp.to_string().dimmed(),
                describe(raw),
                name.bold(),
                event.value,
                status
            );
        }
    }

    for action in session.drain_actions() {
        println!("  {}", action.to_string().cyan());
    }
}

fn print_pages(session: &Session) {
    for (i, name) in session.page_names().into_iter().enumerate() {
        let marker = if i == session.active_index() { "▶" } else { " " };
        println!("  {} {}: {}", marker.green(), i, name);
    }
}

fn print_controls(session: &Session) {
    let Some(page) = session.active_page() else {
        return;
    };
    for shadow in page.shadows() {
        let binding = if page.is_bound(shadow.mapping()) {
            "bound".green()
        } else {
            "free".dimmed()
        };
        println!(
            "  {:<12} {:<12} {:<10} {} {}",
            shadow.name(),
            shadow.kind().to_string(),
            shadow.group(),
            shadow.coordinate(),
            binding
        );
    }
}

fn print_apply(session: &mut Session) {
    let mut sink = RecordingSink::new();
    session.apply(&mut sink);

    for control in &sink.writes {
        let Some(state) = sink.painted.get(control) else {
            continue;
        };
        let name = session
            .matcher()
            .control(*control)
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        println!(
            "  {:<12} {} {} {}",
            name,
            state.color,
            state.annotation.as_deref().unwrap_or(""),
            state.value.map(|v| format!("{:.3}", v)).unwrap_or_default()
        );
    }
    println!("  {} write(s)", sink.writes.len());
}

/// Interactive session without hardware
pub fn run_repl(session: &mut Session) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Type {} for commands", "help".cyan());

    loop {
        let prompt = format!("{}> ", session.active_page_name());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = rl.add_history_entry(line.as_str());

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{} {:#}", "error:".red(), e);
                continue;
            }
        };

        match command {
            Command::Exit => break,
            Command::Empty => {}
            Command::Help => print_help(),
            Command::Message(raw) => feed(session, &raw),
            Command::Pages => print_pages(session),
            Command::Page(target) => {
                if let Err(e) = session.set_active_page(&target) {
                    println!("{} {}", "error:".red(), e);
                }
            }
            Command::Next => session.next_page(),
            Command::Prev => session.prev_page(),
            Command::Tick => {
                if session.tick() {
                    print_apply(session);
                }
            }
            Command::Apply => print_apply(session),
            Command::Controls => print_controls(session),
        }
    }

    Ok(())
}

/// Parse a replay file: one hex message per line, `#` starts a comment
pub fn parse_replay(contents: &str) -> Result<Vec<Vec<u8>>> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line = line.split('#').next().unwrap_or("").trim();
            (!line.is_empty()).then(|| {
                parse_hex(line).with_context(|| format!("Replay line {}", i + 1))
            })
        })
        .collect()
}

/// Feed every message of a replay file through the session
pub async fn replay(session: &mut Session, path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
    let messages = parse_replay(&contents)?;

    for raw in &messages {
        feed(session, raw);
    }
    Ok(messages.len())
}
