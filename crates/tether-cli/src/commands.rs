//! Slash-commands typed on stdin while the consumer loop runs.
//!
//!   /photo        – take a photo (saved when it arrives)
//!   /live         – toggle live view
//!   /keepalive    – poke the camera now
//!   /stats        – print session statistics
//!   /help         – show this list
//!   /quit | /exit – close the camera and exit

use std::io::{self, BufRead};
use std::sync::mpsc::Sender;
use std::thread;

use colored::Colorize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Photo,
    ToggleLiveView,
    KeepAlive,
    Stats,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let cmd = line.trim();
        if cmd.is_empty() {
            return None;
        }
        Some(match cmd {
            "/photo" | "/p" => Command::Photo,
            "/live" => Command::ToggleLiveView,
            "/keepalive" => Command::KeepAlive,
            "/stats" => Command::Stats,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Forward parsed stdin lines to `tx` from a background thread.  EOF is
/// reported as [`Command::Quit`].
pub fn spawn_reader(tx: Sender<Command>) {
    let spawned = thread::Builder::new()
        .name("tether-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                if let Some(cmd) = Command::parse(&line)
                    && tx.send(cmd).is_err()
                {
                    return;
                }
            }
            let _ = tx.send(Command::Quit);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start stdin reader; commands are unavailable");
    }
}

pub fn print_help() {
    println!();
    println!("{}", "tether commands".bold().underline());
    println!("  {}       – take a photo", "/photo".bold().cyan());
    println!("  {}        – toggle live view", "/live".bold().cyan());
    println!("  {}   – send a keep-alive now", "/keepalive".bold().cyan());
    println!("  {}       – session statistics", "/stats".bold().cyan());
    println!("  {}        – show this list", "/help".bold().cyan());
    println!("  {} – close the camera and exit", "/quit  /exit".bold().cyan());
    println!();
}
