//! CLI execution helpers for integration tests
//!
//! Wraps the `tw` binary built for this test run.

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

pub fn tw_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tw"))
}

/// Command execution result
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `tw` to completion
pub fn run_tw(working_dir: &Path, args: &[&str]) -> Result<CommandResult> {
    let output = Command::new(tw_binary())
        .args(args)
        .current_dir(working_dir)
        .output()
        .context("Failed to execute tw")?;

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// A long-running `tw` process whose stdout is read line by line
pub struct RunningTw {
    child: Child,
    lines: Receiver<String>,
}

impl RunningTw {
    pub fn spawn(working_dir: &Path, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(tw_binary())
            .args(args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn tw")?;

        let stdout = child.stdout.take().context("stdout not captured")?;
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self { child, lines })
    }

    /// Wait for a stdout line matching `pred`, skipping others
    pub fn wait_for_line(&self, timeout: Duration, pred: impl Fn(&str) -> bool) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.lines.recv_timeout(remaining) {
                Ok(line) if pred(&line) => return Some(line),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for RunningTw {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
