//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::RunnerError;
use crate::filesys::file::File;
use crate::http::client::ClientOptions;
use crate::lease::jmp::ClientIdentity;
use crate::logs::LogLevel;

/// Runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Device control configuration
    #[serde(default)]
    pub device: DeviceSettings,

    /// Deployment polling configuration
    #[serde(default)]
    pub poll: PollSettings,

    /// Seconds the leased work gets to wind down after cancellation
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,

    /// Device checks run once the deployment completed
    #[serde(default)]
    pub post_deploy: Option<PostDeploySettings>,
}

fn default_true() -> bool {
    true
}

fn default_cancel_grace() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            backend: BackendSettings::default(),
            device: DeviceSettings::default(),
            poll: PollSettings::default(),
            cancel_grace_secs: default_cancel_grace(),
            post_deploy: None,
        }
    }
}

impl Settings {
    /// Read and validate a settings file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let file = File::new(path.as_ref());
        let settings: Settings = file.read_json().await.map_err(|e| {
            RunnerError::ConfigError(format!("{}: {}", file.path().display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(RunnerError::ConfigError("backend.base_url must be set".into()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(RunnerError::ConfigError("backend.timeout_secs must be positive".into()));
        }
        if self.poll.interval_secs == 0 {
            return Err(RunnerError::ConfigError("poll.interval_secs must be positive".into()));
        }
        if self.poll.timeout_secs == 0 {
            return Err(RunnerError::ConfigError("poll.timeout_secs must be positive".into()));
        }
        if self.device.command_timeout_secs == 0 {
            return Err(RunnerError::ConfigError(
                "device.command_timeout_secs must be positive".into(),
            ));
        }
        if self.device.client_config.is_some() && self.device.client.is_some() {
            return Err(RunnerError::ConfigError(
                "Provide only one of device.client_config or device.client".into(),
            ));
        }
        if let Some(post_deploy) = &self.post_deploy {
            post_deploy.validate()?;
        }
        Ok(())
    }

    /// Backend client options carrying `token`
    pub fn client_options(&self, token: SecretString) -> ClientOptions {
        ClientOptions {
            base_url: self.backend.base_url.clone(),
            token,
            verify_tls: self.backend.verify_tls,
            timeout: Duration::from_secs(self.backend.timeout_secs),
        }
    }
}

/// Backend API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL for the backend API
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            verify_tls: true,
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Device control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Lease label selector
    #[serde(default)]
    pub selector: String,

    /// Lease duration, e.g. `30m`
    #[serde(default = "default_lease_duration")]
    pub duration: String,

    /// Exporter expected to be visible before leasing
    #[serde(default)]
    pub exporter: Option<String>,

    #[serde(default = "default_true")]
    pub fail_on_missing_exporter: bool,

    /// Client config file passed to the tool
    #[serde(default)]
    pub client_config: Option<PathBuf>,

    /// Named client passed to the tool; exclusive with `client_config`
    #[serde(default)]
    pub client: Option<String>,

    /// Path of the tool executable
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Timeout of a single tool invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_exporters_dir")]
    pub exporters_dir: Option<String>,

    #[serde(default)]
    pub skip_exporter_query: bool,
}

fn default_lease_duration() -> String {
    "30m".to_string()
}

fn default_program() -> PathBuf {
    PathBuf::from("jmp")
}

fn default_command_timeout() -> u64 {
    60
}

fn default_exporters_dir() -> Option<String> {
    Some("/etc/jumpstarter/exporters".to_string())
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            selector: String::new(),
            duration: default_lease_duration(),
            exporter: None,
            fail_on_missing_exporter: true,
            client_config: None,
            client: None,
            program: default_program(),
            command_timeout_secs: default_command_timeout(),
            exporters_dir: default_exporters_dir(),
            skip_exporter_query: false,
        }
    }
}

impl DeviceSettings {
    pub fn client_identity(&self) -> ClientIdentity {
        match (&self.client_config, &self.client) {
            (Some(path), _) => ClientIdentity::Config(path.clone()),
            (None, Some(name)) => ClientIdentity::Named(name.clone()),
            (None, None) => ClientIdentity::Default,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Deployment polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_success_states")]
    pub success_states: Vec<String>,

    #[serde(default = "default_failure_states")]
    pub failure_states: Vec<String>,
}

fn default_poll_timeout() -> u64 {
    1800
}

fn default_poll_interval() -> u64 {
    30
}

fn default_success_states() -> Vec<String> {
    ["COMPLETE", "COMPLETED", "SUCCESS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_failure_states() -> Vec<String> {
    ["FAILED", "ERROR", "CANCELLED"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout(),
            interval_secs: default_poll_interval(),
            success_states: default_success_states(),
            failure_states: default_failure_states(),
        }
    }
}

/// Device checks after a completed deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostDeploySettings {
    /// Power cycle the device through the exporter
    #[serde(default)]
    pub power_cycle: bool,

    /// Seconds to keep the power off during the cycle
    #[serde(default)]
    pub power_wait_secs: Option<u64>,

    #[serde(default)]
    pub ready: Option<ReadySettings>,
}

impl PostDeploySettings {
    fn validate(&self) -> Result<(), RunnerError> {
        match &self.ready {
            Some(ready) => ready.validate(),
            None => Ok(()),
        }
    }
}

/// Wait-for-ready check run through the exporter shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadySettings {
    pub command: String,

    /// Output must match this regex on top of a zero exit code
    #[serde(default)]
    pub success_regex: Option<String>,

    #[serde(default = "default_true")]
    pub search_stderr: bool,

    #[serde(default = "default_ready_retries")]
    pub retries: u32,

    #[serde(default = "default_ready_delay")]
    pub delay_secs: f64,

    #[serde(default = "default_ready_backoff")]
    pub backoff: f64,

    #[serde(default = "default_ready_max_delay")]
    pub max_delay_secs: f64,
}

fn default_ready_retries() -> u32 {
    10
}

fn default_ready_delay() -> f64 {
    2.0
}

fn default_ready_backoff() -> f64 {
    1.5
}

fn default_ready_max_delay() -> f64 {
    30.0
}

impl ReadySettings {
    fn validate(&self) -> Result<(), RunnerError> {
        let invalid = |msg: &str| Err(RunnerError::ConfigError(format!("post_deploy.ready.{msg}")));
        if self.command.trim().is_empty() {
            return invalid("command must be set");
        }
        if self.retries == 0 {
            return invalid("retries must be at least 1");
        }
        if self.delay_secs.is_nan() || self.delay_secs < 0.0 || self.max_delay_secs.is_nan() || self.max_delay_secs < 0.0 {
            return invalid("delays must not be negative");
        }
        if self.backoff.is_nan() || self.backoff < 1.0 {
            return invalid("backoff must be at least 1.0");
        }
        if let Some(pattern) = &self.success_regex {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(RunnerError::ConfigError(format!(
                    "post_deploy.ready.success_regex: {e}"
                )));
            }
        }
        Ok(())
    }
}
