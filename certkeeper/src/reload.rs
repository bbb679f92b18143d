//! Reload coordinator - runs each owed reload command once per batch

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::ExitStatus;
use tokio::process::Command as TokioCommand;

use crate::defaults::{RELOAD_OUTPUT_PREVIEW_CHARS, RELOAD_SHELL};

/// Distinct reload commands owed by one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingReloads(BTreeSet<String>);

impl PendingReloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command. Empty commands and repeats are ignored.
    pub fn add(&mut self, command: &str) {
        let command = command.trim();
        if !command.is_empty() {
            self.0.insert(command.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Executes the reload commands of a finished batch.
///
/// Implementations must not fail the batch: the certificates are already
/// renewed by the time this runs, so problems are only logged.
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self, pending: PendingReloads);
}

/// Runs every command through `/bin/sh -c`, one after the other.
#[derive(Debug, Clone, Default)]
pub struct ShellReloader;

#[async_trait]
impl Reloader for ShellReloader {
    async fn reload(&self, pending: PendingReloads) {
        if pending.is_empty() {
            return;
        }

        tracing::info!(count = pending.len(), "Running reload commands");
        for command in pending.iter() {
            match run_command(command).await {
                Ok(()) => tracing::info!(command = %command, "Reload command succeeded"),
                Err(e) => tracing::error!(command = %command, "{}", e),
            }
        }
    }
}

async fn run_command(command: &str) -> Result<(), String> {
    let output = TokioCommand::new(RELOAD_SHELL)
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| format!("Failed to start reload command: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(format_process_failure(
            "Reload command failed",
            output.status,
            &output.stdout,
            &output.stderr,
        ))
    }
}

fn format_process_failure(
    context: &str,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> String {
    let status_text = match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };

    let combined = [stdout, stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if combined.is_empty() {
        return format!("{context} ({status_text})");
    }

    let preview: String = combined.chars().take(RELOAD_OUTPUT_PREVIEW_CHARS).collect();
    if combined.chars().count() > RELOAD_OUTPUT_PREVIEW_CHARS {
        format!("{context} ({status_text}): {preview}...")
    } else {
        format!("{context} ({status_text}): {preview}")
    }
}
