//! Wait for a device to come back after a power cycle or an update
//!
//! A check command is run through the exporter shell until it succeeds:
//! exit code 0 and, when a pattern is set, a match in its output. Failed
//! checks are retried with exponential backoff.

use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{DeviceControlError, ReadyError};
use crate::lease::jmp::{DeviceControl, ShellOutput};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// What counts as ready, and how hard to try
#[derive(Debug, Clone)]
pub struct ReadyCheck {
    /// Command typed into the exporter shell, e.g. `j shell ready`
    pub command: String,

    pub success_pattern: Option<Regex>,

    /// Match the pattern against stdout and stderr, not stdout alone
    pub search_stderr: bool,

    /// Total number of checks
    pub retries: u32,

    pub cooldown: CooldownOptions,
}

impl ReadyCheck {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            success_pattern: None,
            search_stderr: true,
            retries: 10,
            cooldown: CooldownOptions::default(),
        }
    }

    fn is_ready(&self, output: &ShellOutput) -> bool {
        if !output.success() {
            return false;
        }
        match &self.success_pattern {
            None => true,
            Some(pattern) if self.search_stderr => {
                pattern.is_match(&format!("{}\n{}", output.stdout, output.stderr))
            }
            Some(pattern) => pattern.is_match(&output.stdout),
        }
    }
}

/// One check
#[derive(Debug, Clone, Serialize)]
pub struct ReadyAttempt {
    pub attempt: u32,
    pub ok: bool,
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,

    /// Wait before the next check
    pub sleep: Duration,
}

/// Device reached the ready condition
#[derive(Debug, Clone, Serialize)]
pub struct ReadyOutcome {
    pub attempts: u32,
    pub elapsed: Duration,
    pub history: Vec<ReadyAttempt>,
}

/// Run the check through the exporter shell until the device is ready
///
/// A check that times out counts as a failed attempt. Any other
/// device-control error ends the wait.
pub async fn wait_ready(
    control: &dyn DeviceControl,
    exporter: &str,
    check: &ReadyCheck,
    cancel: &CancellationToken,
) -> Result<ReadyOutcome, ReadyError> {
    let started = Instant::now();
    let retries = check.retries.max(1);
    let commands = [check.command.clone()];
    let mut history = Vec::new();
    let mut last = None;

    for attempt in 1..=retries {
        if cancel.is_cancelled() {
            return Err(ReadyError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReadyError::Cancelled),
            result = control.shell(exporter, &commands) => result,
        };

        let output = match result {
            Ok(output) => output,
            Err(DeviceControlError::Timeout { cmd, timeout }) => ShellOutput {
                cmd,
                rc: -1,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
            },
            Err(e) => return Err(e.into()),
        };

        let ok = check.is_ready(&output);
        let sleep = if ok || attempt == retries {
            Duration::ZERO
        } else {
            calc_exp_backoff(&check.cooldown, attempt - 1)
        };
        history.push(ReadyAttempt {
            attempt,
            ok,
            rc: output.rc,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            sleep,
        });

        if ok {
            info!("Device {} ready after {} checks", exporter, attempt);
            return Ok(ReadyOutcome {
                attempts: attempt,
                elapsed: started.elapsed(),
                history,
            });
        }

        if attempt == retries {
            last = Some(output);
            break;
        }

        debug!("Device {} not ready (check {}, rc {}), next check in {:?}", exporter, attempt, output.rc, sleep);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReadyError::Cancelled),
            _ = tokio::time::sleep(sleep) => {}
        }
    }

    warn!("Device {} still not ready after {} checks", exporter, retries);
    let (last_rc, last_output) = match last {
        Some(output) if output.stderr.trim().is_empty() => (output.rc, output.stdout.trim().to_string()),
        Some(output) => (output.rc, output.stderr.trim().to_string()),
        None => (-1, String::new()),
    };
    Err(ReadyError::NotReady {
        attempts: retries,
        last_rc,
        last_output,
    })
}
