//! Line-oriented operator console on stdin/stdout.
//!
//! A reader thread parses one command per line and hands it to the
//! executor through a static `embassy-sync` channel; [`serve`] applies
//! each command to the controller and prints one JSON reply per line.
//!
//! ```text
//!  stdin ──▶ reader thread ──▶ CONSOLE_COMMANDS ──▶ serve() ──▶ Controller
//!                                                      │
//!  stdout ◀──────────────── JSON reply ◀───────────────┘
//! ```
//!
//! Accepted input: a bare `status`, `reset`, `pause` or `resume`, or a
//! JSON [`AppCommand`] such as `{"command":"dispense","pump":"acid","seconds":5}`.

use std::io::{self, BufRead};
use std::thread;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};
use serde_json::json;

use crate::app::commands::AppCommand;
use crate::app::service::Controller;

const CMD_DEPTH: usize = 4;

pub type CommandQueue = Channel<CriticalSectionRawMutex, AppCommand, CMD_DEPTH>;

/// Console thread → controller executor.
pub static CONSOLE_COMMANDS: CommandQueue = Channel::new();

/// `None` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Option<Result<AppCommand, String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let cmd = match line {
        "status" => Ok(AppCommand::Status),
        "reset" => Ok(AppCommand::Reset),
        "pause" => Ok(AppCommand::Pause { reason: String::new() }),
        "resume" => Ok(AppCommand::Resume),
        json => serde_json::from_str(json).map_err(|e| format!("bad command {json:?}: {e}")),
    };
    Some(cmd)
}

/// Read stdin on a background thread until EOF.
pub fn spawn_stdin_reader(queue: &'static CommandQueue) -> io::Result<()> {
    thread::Builder::new().name("console".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("console read failed: {}", e);
                    break;
                }
            };
            match parse_line(&line) {
                Some(Ok(cmd)) => futures_lite::future::block_on(queue.send(cmd)),
                Some(Err(e)) => println!("{}", json!({ "ok": false, "error": e })),
                None => {}
            }
        }
        info!("console closed");
    })?;
    Ok(())
}

/// Apply queued commands forever.
pub async fn serve(controller: &Controller, queue: &CommandQueue) -> crate::error::Result<()> {
    loop {
        let cmd = queue.receive().await;
        let reply = match controller.handle_command(cmd).await {
            Ok(Some(status)) => json!({ "ok": true, "status": status }),
            Ok(None) => json!({ "ok": true }),
            Err(e) => json!({ "ok": false, "error": e.to_string() }),
        };
        println!("{reply}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::pump::PumpKind;

    #[test]
    fn bare_words_and_json() {
        assert_eq!(parse_line("status"), Some(Ok(AppCommand::Status)));
        assert_eq!(parse_line("  reset \n"), Some(Ok(AppCommand::Reset)));
        assert_eq!(
            parse_line(r#"{"command":"dispense","pump":"acid","seconds":5}"#),
            Some(Ok(AppCommand::Dispense {
                pump: PumpKind::Acid,
                seconds: 5.0
            }))
        );
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("# comment"), None);
        assert!(matches!(parse_line("reboot"), Some(Err(_))));
    }
}
