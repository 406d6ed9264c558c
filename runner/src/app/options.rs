//! Run configuration options

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::deploy::status::StatusMap;
use crate::errors::RunnerError;
use crate::lease::jmp::{ClientIdentity, LeaseRequest};
use crate::lease::preflight::PreflightOptions;
use crate::storage::settings::{ReadySettings, Settings};
use crate::utils::CooldownOptions;
use crate::workers::poller;
use crate::workers::ready::ReadyCheck;

/// Options of one orchestrated run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Lease to hold for the whole run
    pub lease: LeaseRequest,

    /// Preflight checks
    pub preflight: PreflightOptions,

    /// Deployment status polling
    pub poller: poller::Options,

    /// Terminal state vocabulary
    pub status_map: StatusMap,

    /// Device checks after a completed deployment
    pub post_deploy: Option<PostDeploy>,

    /// Time the leased work gets to wind down after cancellation
    pub cancel_grace: Duration,

    /// Time reserved for REPORT once the work was cut off
    pub report_timeout: Duration,
}

/// Power cycle and wait-for-ready after the deployment completed
#[derive(Debug, Clone, Default)]
pub struct PostDeploy {
    pub power_cycle: bool,
    pub power_wait: Option<u64>,
    pub ready: Option<ReadyCheck>,
}

impl RunOptions {
    pub fn new(lease: LeaseRequest) -> Self {
        Self {
            preflight: PreflightOptions {
                identity: lease.client_identity.clone(),
                ..Default::default()
            },
            lease,
            poller: poller::Options::default(),
            status_map: StatusMap::default(),
            post_deploy: None,
            cancel_grace: Duration::from_secs(30),
            report_timeout: Duration::from_secs(60),
        }
    }
}

fn secs(field: &str, value: f64) -> Result<Duration, RunnerError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| RunnerError::ConfigError(format!("post_deploy.ready.{field}: {e}")))
}

fn ready_check(settings: &ReadySettings) -> Result<ReadyCheck, RunnerError> {
    let success_pattern = settings
        .success_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| RunnerError::ConfigError(format!("post_deploy.ready.success_regex: {e}")))?;

    Ok(ReadyCheck {
        command: settings.command.clone(),
        success_pattern,
        search_stderr: settings.search_stderr,
        retries: settings.retries,
        cooldown: CooldownOptions {
            base_delay: secs("delay_secs", settings.delay_secs)?,
            max_delay: secs("max_delay_secs", settings.max_delay_secs)?,
            multiplier: settings.backoff,
        },
    })
}

impl TryFrom<&Settings> for RunOptions {
    type Error = RunnerError;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        let identity = settings.device.client_identity();
        let post_deploy = match &settings.post_deploy {
            Some(post) => Some(PostDeploy {
                power_cycle: post.power_cycle,
                power_wait: post.power_wait_secs,
                ready: post.ready.as_ref().map(ready_check).transpose()?,
            }),
            None => None,
        };

        Ok(Self {
            lease: LeaseRequest {
                selector: settings.device.selector.clone(),
                duration: settings.device.duration.clone(),
                client_identity: identity.clone(),
            },
            preflight: PreflightOptions {
                exporter: settings.device.exporter.clone(),
                fail_on_missing_exporter: settings.device.fail_on_missing_exporter,
                skip_exporter_query: settings.device.skip_exporter_query,
                exporters_dir: settings.device.exporters_dir.as_ref().map(PathBuf::from),
                identity,
            },
            poller: poller::Options {
                timeout: Duration::from_secs(settings.poll.timeout_secs),
                interval: Duration::from_secs(settings.poll.interval_secs),
            },
            status_map: StatusMap::new(
                settings.poll.success_states.iter().cloned(),
                settings.poll.failure_states.iter().cloned(),
            ),
            post_deploy,
            cancel_grace: Duration::from_secs(settings.cancel_grace_secs),
            // REPORT is a single request
            report_timeout: Duration::from_secs(settings.backend.timeout_secs),
        })
    }
}
