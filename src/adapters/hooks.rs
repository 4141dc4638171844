//! External command hooks.
//!
//! Implements [`HeaterPort`] and [`Notifier`] by running operator-supplied
//! programs (`hooks.heater_off`, `hooks.notify` in the config).  An empty
//! command disables the hook.
//!
//! - The heater command is spawned and reaped on a background thread; only
//!   a failure to start it is reported back, its exit status is logged.
//! - The notify command gets one JSON document on stdin
//!   (`{"event": .., "status": ..}`) and is reaped the same way.
//!
//! Neither call waits for the child, so a slow command never stalls the
//! executor.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;

use log::{debug, info, warn};
use serde::Serialize;

use crate::app::events::LogEvent;
use crate::app::ports::{HeaterPort, Notifier};
use crate::app::status::StatusSnapshot;

#[derive(Debug, Clone)]
pub struct CommandHook {
    name: &'static str,
    argv: Vec<String>,
}

impl CommandHook {
    pub fn new(name: &'static str, argv: Vec<String>) -> Self {
        if argv.is_empty() {
            info!("{} hook disabled", name);
        }
        Self { name, argv }
    }

    pub fn is_enabled(&self) -> bool {
        !self.argv.is_empty()
    }

    fn command(&self) -> Option<Command> {
        let (program, args) = self.argv.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Some(cmd)
    }
}

impl HeaterPort for CommandHook {
    fn heater_off(&mut self) -> Result<(), String> {
        let Some(mut cmd) = self.command() else {
            return Err("no heater_off command configured".into());
        };
        let child = cmd
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| format!("{} hook: {}", self.name, e))?;
        reap(self.name, child, None);
        Ok(())
    }
}

/// Feed `input` to the child's stdin, then wait for it, off the executor.
fn reap(name: &'static str, mut child: Child, input: Option<Vec<u8>>) {
    thread::spawn(move || {
        if let (Some(body), Some(mut stdin)) = (input, child.stdin.take()) {
            if let Err(e) = stdin.write_all(&body) {
                warn!("{} hook stdin: {}", name, e);
            }
            // closing stdin lets the child see EOF
            drop(stdin);
        }
        match child.wait() {
            Ok(status) if status.success() => info!("{} hook done", name),
            Ok(status) => warn!("{} hook exited with {}", name, status),
            Err(e) => warn!("{} hook wait failed: {}", name, e),
        }
    });
}

#[derive(Serialize)]
struct NotifyDocument<'a> {
    event: &'a LogEvent,
    status: &'a StatusSnapshot,
}

impl Notifier for CommandHook {
    fn notify(&mut self, event: &LogEvent, status: &StatusSnapshot) -> Result<(), String> {
        let Some(mut cmd) = self.command() else {
            debug!("{} hook disabled, not sending: {}", self.name, event.message);
            return Ok(());
        };
        let body = serde_json::to_vec(&NotifyDocument { event, status }).map_err(|e| e.to_string())?;
        let child = cmd
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| format!("{} hook: {}", self.name, e))?;
        reap(self.name, child, Some(body));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn empty_heater_hook_reports_failure() {
        let mut hook = CommandHook::new("heater_off", Vec::new());
        assert!(!hook.is_enabled());
        assert!(hook.heater_off().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn heater_hook_does_not_wait_for_the_command() {
        let mut hook = CommandHook::new("heater_off", vec!["sleep".into(), "2".into()]);
        let started = Instant::now();
        assert_eq!(hook.heater_off(), Ok(()));
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn heater_hook_exit_status_is_only_logged() {
        let mut bad = CommandHook::new("heater_off", vec!["false".into()]);
        assert_eq!(bad.heater_off(), Ok(()));
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut hook = CommandHook::new("heater_off", vec!["/nonexistent/heater-off".into()]);
        assert!(hook.heater_off().is_err());
    }
}
