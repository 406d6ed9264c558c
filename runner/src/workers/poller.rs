//! Bounded polling of a status-returning operation
//!
//! Used for deployment status, and for anything else the backend exposes as
//! a state string that eventually becomes terminal.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::status::{StatusClass, StatusMap};
use crate::errors::{ApiError, PollError};

/// A status read the poller can classify
pub trait Observed {
    fn state(&self) -> &str;
    fn reason(&self) -> Option<&str>;
}

/// Poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Total budget before giving up on a non-terminal state
    pub timeout: Duration,

    /// Wait between two status reads
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            interval: Duration::from_secs(30),
        }
    }
}

/// Kind of terminal state reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Success,
    Failure,
}

/// Result of a poll that reached a terminal state
#[derive(Debug, Clone)]
pub struct PollOutcome<T> {
    pub terminal: Terminal,
    pub state: String,
    pub reason: Option<String>,
    pub fetches: u32,
    pub elapsed: Duration,
    pub last: T,
}

/// Poll `fetch` until a terminal state, the timeout, or cancellation
///
/// Transient fetch errors are retried at the normal cadence within the same
/// budget. Other fetch errors end the loop with [`PollError::Fetch`].
pub async fn poll<T, F, Fut>(
    options: &Options,
    status_map: &StatusMap,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<PollOutcome<T>, PollError>
where
    T: Observed,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut fetches: u32 = 0;
    let mut last_state: Option<String> = None;
    let mut last_reason: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            result = fetch() => result,
        };
        fetches += 1;

        match result {
            Ok(observed) => {
                let state = observed.state().to_string();
                if let Some(reason) = observed.reason() {
                    last_reason = Some(reason.to_string());
                }

                match status_map.classify(&state) {
                    StatusClass::Success => {
                        info!("Reached {} after {} status reads", state, fetches);
                        return Ok(PollOutcome {
                            terminal: Terminal::Success,
                            state,
                            reason: None,
                            fetches,
                            elapsed: started.elapsed(),
                            last: observed,
                        });
                    }
                    StatusClass::Failure => {
                        warn!("Reached {} after {} status reads", state, fetches);
                        return Ok(PollOutcome {
                            terminal: Terminal::Failure,
                            state,
                            reason: last_reason,
                            fetches,
                            elapsed: started.elapsed(),
                            last: observed,
                        });
                    }
                    StatusClass::InProgress => {
                        debug!("Still in progress: {} (read {})", state, fetches);
                        last_state = Some(state);
                    }
                }
            }
            Err(e) if e.is_transient() => {
                warn!("Status read {} failed, retrying: {}", fetches, e);
            }
            Err(e) => return Err(PollError::Fetch(e)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout {
                last_state,
                elapsed: now - started,
            });
        }

        let wait = options.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
