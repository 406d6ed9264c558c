//! Orchestrated update test run
//!
//! One run goes through PREFLIGHT, LEASE_ACQUIRE, EVENTS_CREATE_LOCK, DEPLOY,
//! POLL, VERIFY, REPORT and LEASE_RELEASE strictly in that order. Every path
//! that acquired a lease releases it exactly once, and every path that opened
//! a test record reports it exactly once, cancellation included.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Map, Value};
use sums_models::TestEventRequest;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::options::{PostDeploy, RunOptions};
use crate::app::report::{PhaseFailure, RunPhase, RunReport};
use crate::deploy::lifecycle::EventLifecycle;
use crate::errors::{ApiError, LifecycleError, PollError, PreflightError, ReadyError};
use crate::http::client::HttpClient;
use crate::lease::guard::{with_lease, BlockOutcome, Lease};
use crate::lease::jmp::{DeviceControl, PowerAction};
use crate::lease::preflight::preflight;
use crate::models::event::EventKind;
use crate::models::plan::RunPlan;
use crate::models::test_run::TestStatus;
use crate::utils::generate_uuid;
use crate::workers::poller::{self, Terminal};
use crate::workers::ready::wait_ready;

/// Runs one update test end to end
pub struct Orchestrator {
    lifecycle: EventLifecycle,
    control: Arc<dyn DeviceControl>,
    plan: RunPlan,
    options: RunOptions,
}

fn lifecycle_failure(phase: RunPhase, err: LifecycleError) -> PhaseFailure {
    PhaseFailure::new(phase, err.kind(), err.to_string())
}

fn ensure_active(cancel: &CancellationToken, phase: RunPhase) -> Result<(), PhaseFailure> {
    if cancel.is_cancelled() {
        return Err(PhaseFailure::cancelled(phase));
    }
    Ok(())
}

impl Orchestrator {
    pub fn new(
        http_client: Arc<HttpClient>,
        control: Arc<dyn DeviceControl>,
        plan: RunPlan,
        options: RunOptions,
    ) -> Self {
        Self {
            lifecycle: EventLifecycle::new(http_client, plan.context.clone()),
            control,
            plan,
            options,
        }
    }

    /// Run every phase and return the final report
    ///
    /// Never fails: every failure ends up in the report.
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        let mut report = RunReport::default();

        report.enter(RunPhase::Preflight);
        if let Err(e) = self.preflight(&mut report).await {
            error!("Preflight failed: {}", e);
            report.record_failure(PhaseFailure::new(RunPhase::Preflight, e.kind(), e.to_string()));
            return report.finish();
        }
        if let Err(failure) = ensure_active(&cancel, RunPhase::Preflight) {
            report.record_failure(failure);
            return report.finish();
        }

        // the work gets cancel_grace, REPORT gets the rest
        let grace = self.options.cancel_grace + self.options.report_timeout;

        report.enter(RunPhase::LeaseAcquire);
        let scoped = with_lease(
            self.control.clone(),
            &self.options.lease,
            &cancel,
            grace,
            |lease, cancel| self.leased(&mut report, lease, cancel),
        )
        .await;

        let interrupted = report.phase;
        report.enter(RunPhase::LeaseRelease);
        match scoped {
            Err(e) => {
                error!("{}", e);
                report.record_failure(PhaseFailure::new(RunPhase::LeaseAcquire, e.kind(), e.to_string()));
            }
            Ok(scoped) => {
                report.lease_name = Some(scoped.lease.lease_name.clone());
                if scoped.outcome == BlockOutcome::Cancelled {
                    warn!("Leased work did not wind down within {:?}", grace);
                    report.record_failure(PhaseFailure::cancelled(interrupted));
                    if report.test_run.as_ref().is_some_and(|t| !t.is_reported()) {
                        report.note("test run was left open: REPORT did not finish after cancellation");
                    }
                }
                if let Err(warning) = scoped.release {
                    warn!("{}", warning);
                    report.release_warning = Some(warning);
                }
            }
        }

        let report = report.finish();
        info!("Run finished: {} ({})", report.status.as_str(), report.summary);
        report
    }

    async fn preflight(&self, report: &mut RunReport) -> Result<(), PreflightError> {
        self.plan.validate()?;
        if self.options.lease.selector.trim().is_empty() {
            return Err(PreflightError::InvalidPlan("lease selector must not be empty".into()));
        }
        if self.options.lease.duration.trim().is_empty() {
            return Err(PreflightError::InvalidPlan("lease duration must not be empty".into()));
        }

        if self.options.post_deploy.is_some() && self.options.preflight.exporter.is_none() {
            return Err(PreflightError::InvalidPlan(
                "post-deploy device checks need an exporter".into(),
            ));
        }

        let found = preflight(self.control.as_ref(), &self.options.preflight).await?;
        report.preflight = Some(found);
        Ok(())
    }

    /// Everything done while the lease is held, REPORT included
    ///
    /// After cancellation the work gets `cancel_grace` before it is cut off;
    /// REPORT runs either way.
    async fn leased(&self, report: &mut RunReport, lease: Lease, cancel: CancellationToken) {
        report.lease_name = Some(lease.lease_name.clone());

        let finished = {
            let work = self.drive(report, &lease, &cancel);
            tokio::pin!(work);

            let finished = tokio::select! {
                biased;
                result = &mut work => Some(result),
                _ = cancel.cancelled() => None,
            };
            match finished {
                Some(result) => Some(result),
                None => tokio::time::timeout(self.options.cancel_grace, &mut work).await.ok(),
            }
        };

        let result = finished.unwrap_or_else(|| {
            warn!("Work did not wind down within {:?}, cut off in {}", self.options.cancel_grace, report.phase);
            Err(PhaseFailure::cancelled(report.phase))
        });
        if let Err(failure) = result {
            error!("{} failed: {}", failure.phase, failure.message);
            report.record_failure(failure);
        }

        report.enter(RunPhase::Report);
        self.report(report).await;
    }

    async fn drive(
        &self,
        report: &mut RunReport,
        lease: &Lease,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseFailure> {
        let phase = RunPhase::EventsCreateLock;
        report.enter(phase);
        ensure_active(cancel, phase)?;

        let vin = self.plan.vehicle.vin.as_str();
        let source = self
            .lifecycle
            .create_event(EventKind::Source, vin, &self.plan.source.build_level, &self.plan.source.ecus)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.source_event = Some(source.clone());

        ensure_active(cancel, phase)?;
        let target = self
            .lifecycle
            .create_event(EventKind::Target, vin, &self.plan.target.build_level, &self.plan.target.ecus)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.target_event = Some(target.clone());

        // opened before locking, so a lock failure is reported too
        let request = self.test_event_request(source.event_id(), target.event_id(), lease);
        let test_run = self
            .lifecycle
            .open_test_run(&request)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.test_run = Some(test_run);

        ensure_active(cancel, phase)?;
        let source = self
            .lifecycle
            .lock_event(&source)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.source_event = Some(source.clone());

        ensure_active(cancel, phase)?;
        let target = self
            .lifecycle
            .lock_event(&target)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.target_event = Some(target.clone());

        let phase = RunPhase::Deploy;
        report.enter(phase);
        ensure_active(cancel, phase)?;
        let deployment = self
            .lifecycle
            .deploy(&target, &self.plan.deploy)
            .await
            .map_err(|e| lifecycle_failure(phase, e))?;
        report.deployment = Some(deployment.clone());

        let phase = RunPhase::Poll;
        report.enter(phase);
        let deployment_id = deployment.deployment_id.clone();
        let tracked = Mutex::new(deployment);
        let polled = {
            let lifecycle = &self.lifecycle;
            let status_map = &self.options.status_map;
            let tracked = &tracked;
            let id = deployment_id.as_str();
            poller::poll(&self.options.poller, status_map, cancel, move || async move {
                let snapshot = lifecycle.deployment_status(id).await?;
                tracked
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .observe(&snapshot, status_map.classify(&snapshot.state));
                Ok::<_, ApiError>(snapshot)
            })
            .await
        };

        let deployment = tracked.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.terminal_reason = deployment.terminal_reason().map(str::to_string);
        report.deployment = Some(deployment);

        let outcome = match polled {
            Ok(outcome) => outcome,
            Err(e) => {
                if let PollError::Timeout { last_state, .. } = &e {
                    report.last_state = last_state.clone();
                }
                return Err(PhaseFailure::new(phase, e.kind(), e.to_string()));
            }
        };

        report.last_state = Some(outcome.state.clone());

        match outcome.terminal {
            Terminal::Success => {
                report.summary = format!(
                    "Deployment {} reached {} after {} status reads",
                    deployment_id, outcome.state, outcome.fetches
                );
                match &self.options.post_deploy {
                    Some(post) => self.verify(report, post, cancel).await,
                    None => Ok(()),
                }
            }
            Terminal::Failure => Err(PhaseFailure::new(
                phase,
                "deployment_failed",
                format!(
                    "Deployment {} ended in {}: {}",
                    deployment_id,
                    outcome.state,
                    outcome.reason.as_deref().unwrap_or("no reason reported")
                ),
            )),
        }
    }

    /// VERIFY: power cycle the device and wait until it answers again
    async fn verify(
        &self,
        report: &mut RunReport,
        post: &PostDeploy,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseFailure> {
        let phase = RunPhase::Verify;
        report.enter(phase);
        ensure_active(cancel, phase)?;

        let Some(exporter) = self.options.preflight.exporter.as_deref() else {
            return Err(PhaseFailure::new(phase, "invalid_plan", "no exporter to verify the device on"));
        };

        if post.power_cycle {
            info!("Power cycling {}", exporter);
            let cycled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PhaseFailure::cancelled(phase)),
                cycled = self.control.power(exporter, PowerAction::Cycle, post.power_wait) => cycled,
            };
            cycled.map_err(|e| PhaseFailure::new(phase, e.kind(), format!("Power cycle of {exporter} failed: {e}")))?;
        }

        if let Some(check) = &post.ready {
            let outcome = match wait_ready(self.control.as_ref(), exporter, check, cancel).await {
                Ok(outcome) => outcome,
                Err(ReadyError::Cancelled) => return Err(PhaseFailure::cancelled(phase)),
                Err(e) => return Err(PhaseFailure::new(phase, e.kind(), e.to_string())),
            };
            report.summary = format!("{}; device ready after {} checks", report.summary, outcome.attempts);
            report.ready = Some(outcome);
        }

        Ok(())
    }

    fn test_event_request(&self, source_id: &str, target_id: &str, lease: &Lease) -> TestEventRequest {
        let mut metadata = match &self.plan.test.metadata {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("plan".to_string(), other.clone());
                map
            }
            None => Map::new(),
        };
        metadata.insert("source_event_id".to_string(), json!(source_id));
        metadata.insert("lease_name".to_string(), json!(lease.lease_name));

        TestEventRequest {
            vin: self.plan.vehicle.vin.clone(),
            vehicle_id: self.plan.vehicle.vehicle_id.clone(),
            event_id: target_id.to_string(),
            ansible_job_id: self.plan.test.job_id.clone().unwrap_or_else(generate_uuid),
            git_sha: self.plan.test.git_sha.clone(),
            suite_name: self.plan.test.suite_name.clone(),
            metadata: Some(Value::Object(metadata)),
        }
    }

    /// REPORT: record the verdict on the test run, once
    async fn report(&self, report: &mut RunReport) {
        let Some(mut test_run) = report.test_run.take() else {
            if report.is_failed() {
                report.note("no test run was opened, nothing reported to the backend");
            }
            return;
        };

        let status = if report.is_failed() {
            TestStatus::Fail
        } else {
            TestStatus::Pass
        };

        let mut metadata = Map::new();
        if let Some(deployment) = &report.deployment {
            metadata.insert("deployment_id".to_string(), json!(deployment.deployment_id));
            if let Some(completed_at) = deployment.completed_at() {
                metadata.insert("completed_at".to_string(), json!(completed_at));
            }
        }
        if let Some(state) = &report.last_state {
            metadata.insert("final_state".to_string(), json!(state));
        }
        if let Some(kind) = &report.error_kind {
            metadata.insert("error_kind".to_string(), json!(kind));
        }

        let result = self
            .lifecycle
            .report(
                &mut test_run,
                status,
                report.summary.clone(),
                self.plan.artifact_urls.clone(),
                Some(Value::Object(metadata)),
            )
            .await;
        report.test_run = Some(test_run);

        if let Err(e) = result {
            error!("Failed to report the test run: {}", e);
            if report.is_failed() {
                report.note(format!("report failed: {e}"));
            } else {
                report.record_failure(lifecycle_failure(RunPhase::Report, e));
            }
        }
    }
}
