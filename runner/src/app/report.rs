//! Run phases and the final run report

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::LeaseReleaseWarning;
use crate::lease::preflight::PreflightReport;
use crate::models::deployment::Deployment;
use crate::models::event::Event;
use crate::models::test_run::{TestRun, TestStatus};
use crate::workers::ready::ReadyOutcome;

/// Phases of one run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Preflight,
    LeaseAcquire,
    EventsCreateLock,
    Deploy,
    Poll,
    Verify,
    Report,
    LeaseRelease,
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Preflight => "PREFLIGHT",
            RunPhase::LeaseAcquire => "LEASE_ACQUIRE",
            RunPhase::EventsCreateLock => "EVENTS_CREATE_LOCK",
            RunPhase::Deploy => "DEPLOY",
            RunPhase::Poll => "POLL",
            RunPhase::Verify => "VERIFY",
            RunPhase::Report => "REPORT",
            RunPhase::LeaseRelease => "LEASE_RELEASE",
            RunPhase::Done => "DONE",
        };
        write!(f, "{s}")
    }
}

/// Why a phase failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: RunPhase,
    pub kind: String,
    pub message: String,
}

impl PhaseFailure {
    pub fn new(phase: RunPhase, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(phase: RunPhase) -> Self {
        Self::new(phase, "cancelled", format!("Run cancelled by operator during {phase}"))
    }
}

/// Outcome of one run, printed as JSON at the end
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: TestStatus,

    /// Last phase entered
    pub phase: RunPhase,

    pub failed_phase: Option<RunPhase>,
    pub error_kind: Option<String>,
    pub summary: String,

    pub preflight: Option<PreflightReport>,
    pub source_event: Option<Event>,
    pub target_event: Option<Event>,
    pub deployment: Option<Deployment>,
    pub test_run: Option<TestRun>,
    pub lease_name: Option<String>,
    pub last_state: Option<String>,
    pub terminal_reason: Option<String>,

    /// Wait-for-ready history of the VERIFY phase
    pub ready: Option<ReadyOutcome>,

    pub release_warning: Option<LeaseReleaseWarning>,
    pub notes: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            status: TestStatus::Fail,
            phase: RunPhase::Preflight,
            failed_phase: None,
            error_kind: None,
            summary: String::new(),
            preflight: None,
            source_event: None,
            target_event: None,
            deployment: None,
            test_run: None,
            lease_name: None,
            last_state: None,
            terminal_reason: None,
            ready: None,
            release_warning: None,
            notes: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl RunReport {
    pub fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub fn is_failed(&self) -> bool {
        self.failed_phase.is_some()
    }

    /// Record a failure; the first one decides the run, later ones become notes
    pub fn record_failure(&mut self, failure: PhaseFailure) {
        if self.is_failed() {
            self.notes.push(format!("{}: {}", failure.phase, failure.message));
            return;
        }
        self.failed_phase = Some(failure.phase);
        self.error_kind = Some(failure.kind);
        self.summary = failure.message;
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Settle the status and close the report
    pub fn finish(mut self) -> Self {
        self.status = if self.is_failed() {
            TestStatus::Fail
        } else {
            TestStatus::Pass
        };
        self.phase = RunPhase::Done;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Process exit code for this report
    ///
    /// 0 pass, 1 fail, 130 when the operator cancelled before a lease existed.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            TestStatus::Pass => 0,
            TestStatus::Fail
                if self.error_kind.as_deref() == Some("cancelled") && self.lease_name.is_none() =>
            {
                130
            }
            TestStatus::Fail => 1,
        }
    }
}
