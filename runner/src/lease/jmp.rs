//! Device-control tool (`jmp`) wrapper
//!
//! The tool is a black box: only its commands, exit codes and stdout are
//! relied upon.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeviceControlError;

/// Which client context the tool should use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClientIdentity {
    /// The tool's default client configuration
    #[default]
    Default,

    /// A client config file
    Config(PathBuf),

    /// A named client
    Named(String),
}

impl ClientIdentity {
    /// Flags placed after the subcommand
    pub fn args(&self) -> Vec<String> {
        match self {
            ClientIdentity::Default => Vec::new(),
            ClientIdentity::Config(path) => {
                vec!["--client-config".to_string(), path.display().to_string()]
            }
            ClientIdentity::Named(name) => vec!["--client".to_string(), name.clone()],
        }
    }
}

/// Parameters of a lease request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Label selector, e.g. `exporter=bench-3`
    pub selector: String,

    /// Duration string understood by the tool, e.g. `30m`
    pub duration: String,

    pub client_identity: ClientIdentity,
}

/// Device-control operations, seam for tests
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Tool version; doubles as a presence check
    async fn version(&self) -> Result<String, DeviceControlError>;

    /// Names of the exporters visible to the client
    async fn list_exporters(&self, identity: &ClientIdentity) -> Result<Vec<String>, DeviceControlError>;

    /// Create a lease and return its name
    async fn create_lease(&self, request: &LeaseRequest) -> Result<String, DeviceControlError>;

    /// Extend a live lease
    async fn renew_lease(&self, lease_name: &str, identity: &ClientIdentity) -> Result<(), DeviceControlError>;

    /// Delete a lease
    async fn delete_lease(&self, lease_name: &str, identity: &ClientIdentity) -> Result<(), DeviceControlError>;

    /// Feed `commands` to the exporter shell
    ///
    /// A non-zero exit is returned in the output, not as an error.
    async fn shell(&self, exporter: &str, commands: &[String]) -> Result<ShellOutput, DeviceControlError>;

    /// Switch the device power through the exporter shell
    async fn power(
        &self,
        exporter: &str,
        action: PowerAction,
        wait_secs: Option<u64>,
    ) -> Result<ShellOutput, DeviceControlError> {
        let output = self.shell(exporter, &[power_command(action, wait_secs)]).await?;
        output.check()?;
        Ok(output)
    }
}

/// Captured output of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOutput {
    pub cmd: String,
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.rc == 0
    }

    /// Turn a non-zero exit into [`DeviceControlError::Failed`]
    pub fn check(&self) -> Result<(), DeviceControlError> {
        if self.success() {
            return Ok(());
        }
        let message = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(DeviceControlError::Failed {
            cmd: self.cmd.clone(),
            rc: self.rc,
            message: message.to_string(),
        })
    }
}

/// Device power operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
    Cycle,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
            PowerAction::Cycle => "cycle",
        }
    }
}

/// `j power <action> [--wait <secs>]`, as typed into the exporter shell
pub fn power_command(action: PowerAction, wait_secs: Option<u64>) -> String {
    match wait_secs {
        Some(wait) => format!("j power {} --wait {}", action.as_str(), wait),
        None => format!("j power {}", action.as_str()),
    }
}

/// [`DeviceControl`] backed by the `jmp` command line tool
#[derive(Debug, Clone)]
pub struct JmpCli {
    program: PathBuf,
    timeout: Duration,
}

impl JmpCli {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("jmp", timeout)
    }

    /// Use a specific executable instead of `jmp` from `PATH`
    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn exec(&self, args: &[String], input: Option<&str>) -> Result<ShellOutput, DeviceControlError> {
        let cmd = format!("{} {}", self.program.display(), args.join(" "));
        debug!("Running {}", cmd);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeviceControlError::Spawn {
                cmd: cmd.clone(),
                message: e.to_string(),
            })?;

        let io = async {
            if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
                stdin.write_all(input.as_bytes()).await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, io).await {
            Err(_) => {
                return Err(DeviceControlError::Timeout {
                    cmd,
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(DeviceControlError::Spawn {
                    cmd,
                    message: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        Ok(ShellOutput {
            cmd,
            rc: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run(&self, args: Vec<String>) -> Result<ShellOutput, DeviceControlError> {
        let output = self.exec(&args, None).await?;
        output.check()?;
        Ok(output)
    }
}

#[async_trait]
impl DeviceControl for JmpCli {
    async fn version(&self) -> Result<String, DeviceControlError> {
        let output = self.run(vec!["version".to_string()]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn list_exporters(&self, identity: &ClientIdentity) -> Result<Vec<String>, DeviceControlError> {
        let mut args = vec!["get".to_string(), "exporters".to_string()];
        args.extend(identity.args());
        args.extend(["-o".to_string(), "json".to_string()]);

        let output = self.run(args).await?;
        parse_exporters(&output.stdout).map_err(|message| DeviceControlError::Parse {
            cmd: output.cmd,
            message,
        })
    }

    async fn create_lease(&self, request: &LeaseRequest) -> Result<String, DeviceControlError> {
        let mut args: Vec<String> = [
            "create",
            "lease",
            "-l",
            request.selector.as_str(),
            "--duration",
            request.duration.as_str(),
            "-o",
            "name",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(request.client_identity.args());

        let output = self.run(args).await?;
        let name = output.stdout.trim();
        if name.is_empty() {
            return Err(DeviceControlError::Parse {
                cmd: output.cmd,
                message: "no lease name in output".to_string(),
            });
        }
        Ok(name.to_string())
    }

    async fn renew_lease(&self, lease_name: &str, identity: &ClientIdentity) -> Result<(), DeviceControlError> {
        let mut args = vec!["renew".to_string(), "lease".to_string(), lease_name.to_string()];
        args.extend(identity.args());
        self.run(args).await.map(|_| ())
    }

    async fn delete_lease(&self, lease_name: &str, identity: &ClientIdentity) -> Result<(), DeviceControlError> {
        let mut args = vec!["delete".to_string(), "leases".to_string(), lease_name.to_string()];
        args.extend(identity.args());
        self.run(args).await.map(|_| ())
    }

    async fn shell(&self, exporter: &str, commands: &[String]) -> Result<ShellOutput, DeviceControlError> {
        let args = vec!["shell".to_string(), "--exporter".to_string(), exporter.to_string()];
        if commands.is_empty() {
            return Err(DeviceControlError::Spawn {
                cmd: format!("{} {}", self.program.display(), args.join(" ")),
                message: "no commands to run".to_string(),
            });
        }

        let mut input = commands.join("\n");
        input.push('\n');
        self.exec(&args, Some(&input)).await
    }
}

fn collect_names(items: &[Value], names: &mut BTreeSet<String>) {
    for item in items {
        match item {
            Value::String(name) => {
                names.insert(name.clone());
            }
            Value::Object(map) => {
                if let Some(Value::String(name)) = map.get("name") {
                    names.insert(name.clone());
                }
            }
            _ => {}
        }
    }
}

/// Exporter names from `get exporters -o json`, sorted and deduplicated
///
/// Accepts a bare list (of names or `{name}` objects) or an object holding
/// such a list under `exporters`, `items` or `results`.
pub fn parse_exporters(stdout: &str) -> Result<Vec<String>, String> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let data: Value = serde_json::from_str(stdout).map_err(|e| format!("invalid JSON: {e}"))?;
    let mut names = BTreeSet::new();

    match &data {
        Value::Array(items) => collect_names(items, &mut names),
        Value::Object(map) => {
            for key in ["exporters", "items", "results"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    collect_names(items, &mut names);
                }
            }
        }
        _ => {}
    }

    Ok(names.into_iter().collect())
}
