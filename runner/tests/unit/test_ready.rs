//! Wait-for-ready tests with a scripted exporter shell on a paused clock

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use otarun::errors::{DeviceControlError, ReadyError};
use otarun::lease::jmp::{ClientIdentity, DeviceControl, LeaseRequest, ShellOutput};
use otarun::utils::CooldownOptions;
use otarun::workers::ready::{wait_ready, ReadyCheck};
use regex::Regex;
use tokio_util::sync::CancellationToken;

/// Exporter shell answering from a script; not ready once the script runs out
#[derive(Default)]
struct ScriptedShell {
    replies: Mutex<VecDeque<Result<ShellOutput, DeviceControlError>>>,
    calls: AtomicU32,
    commands: Mutex<Vec<String>>,
}

fn reply(rc: i32, stdout: &str, stderr: &str) -> Result<ShellOutput, DeviceControlError> {
    Ok(ShellOutput {
        cmd: "jmp shell --exporter bench-3".to_string(),
        rc,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    })
}

impl ScriptedShell {
    fn new(replies: Vec<Result<ShellOutput, DeviceControlError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceControl for ScriptedShell {
    async fn version(&self) -> Result<String, DeviceControlError> {
        Ok("jmp 0.6.0".to_string())
    }

    async fn list_exporters(&self, _identity: &ClientIdentity) -> Result<Vec<String>, DeviceControlError> {
        Ok(vec!["bench-3".to_string()])
    }

    async fn create_lease(&self, _request: &LeaseRequest) -> Result<String, DeviceControlError> {
        Ok("lease-1".to_string())
    }

    async fn renew_lease(&self, _lease_name: &str, _identity: &ClientIdentity) -> Result<(), DeviceControlError> {
        Ok(())
    }

    async fn delete_lease(&self, _lease_name: &str, _identity: &ClientIdentity) -> Result<(), DeviceControlError> {
        Ok(())
    }

    async fn shell(&self, _exporter: &str, commands: &[String]) -> Result<ShellOutput, DeviceControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().extend(commands.iter().cloned());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| reply(1, "", "still booting"))
    }
}

fn check(retries: u32) -> ReadyCheck {
    let mut check = ReadyCheck::new("j shell ready");
    check.retries = retries;
    check.cooldown = CooldownOptions {
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    };
    check
}

#[tokio::test(start_paused = true)]
async fn test_ready_on_third_check_with_backoff() {
    let shell = ScriptedShell::new(vec![reply(1, "", "no route"), reply(1, "", "no route"), reply(0, "ok", "")]);
    let cancel = CancellationToken::new();

    let outcome = wait_ready(&shell, "bench-3", &check(10), &cancel).await.unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(shell.calls(), 3);
    let sleeps: Vec<Duration> = outcome.history.iter().map(|a| a.sleep).collect();
    assert_eq!(sleeps, vec![Duration::from_secs(2), Duration::from_secs(4), Duration::ZERO]);
    assert!(outcome.history[2].ok);
    assert!(outcome.elapsed >= Duration::from_secs(6));
    assert!(outcome.elapsed < Duration::from_secs(7));
    assert_eq!(*shell.commands.lock().unwrap(), vec!["j shell ready"; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_is_searched_in_stderr() {
    let shell = ScriptedShell::new(vec![reply(0, "booting", ""), reply(0, "", "bench-3 login:")]);
    let mut ready = check(5);
    ready.success_pattern = Some(Regex::new(r"login:\s*$").unwrap());

    let outcome = wait_ready(&shell, "bench-3", &ready, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.history[0].ok);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_on_stdout_only() {
    let shell = ScriptedShell::new(vec![reply(0, "", "bench-3 login:"), reply(0, "", "bench-3 login:")]);
    let mut ready = check(2);
    ready.success_pattern = Some(Regex::new("login:").unwrap());
    ready.search_stderr = false;

    let err = wait_ready(&shell, "bench-3", &ready, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ReadyError::NotReady { attempts: 2, last_rc: 0, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_not_ready_after_all_retries() {
    let shell = ScriptedShell::new(vec![reply(2, "", "no route"), reply(2, "", "no route"), reply(2, "", "no route")]);

    let err = wait_ready(&shell, "bench-3", &check(3), &CancellationToken::new()).await.unwrap_err();

    match &err {
        ReadyError::NotReady { attempts, last_rc, last_output } => {
            assert_eq!(*attempts, 3);
            assert_eq!(*last_rc, 2);
            assert_eq!(last_output, "no route");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), "device_not_ready");
    assert_eq!(shell.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_check_counts_as_attempt() {
    let shell = ScriptedShell::new(vec![
        Err(DeviceControlError::Timeout {
            cmd: "jmp shell --exporter bench-3".to_string(),
            timeout: Duration::from_secs(60),
        }),
        reply(0, "", ""),
    ]);

    let outcome = wait_ready(&shell, "bench-3", &check(3), &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.history[0].rc, -1);
    assert!(outcome.history[0].stderr.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_tool_ends_the_wait() {
    let shell = ScriptedShell::new(vec![Err(DeviceControlError::Spawn {
        cmd: "jmp shell --exporter bench-3".to_string(),
        message: "No such file or directory".to_string(),
    })]);

    let err = wait_ready(&shell, "bench-3", &check(5), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ReadyError::Control(DeviceControlError::Spawn { .. })));
    assert_eq!(err.kind(), "device_control_unavailable");
    assert_eq!(shell.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let shell = ScriptedShell::default();
    let mut ready = check(5);
    ready.cooldown.base_delay = Duration::from_secs(60);
    ready.cooldown.max_delay = Duration::from_secs(60);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    });

    let err = wait_ready(&shell, "bench-3", &ready, &cancel).await.unwrap_err();
    assert!(matches!(err, ReadyError::Cancelled));
    assert_eq!(shell.calls(), 1);
}
