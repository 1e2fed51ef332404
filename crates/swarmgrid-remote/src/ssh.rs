//! Remote execution through the system `ssh` and `scp` binaries.
//!
//! Every invocation runs under a hard timeout. A command that outlives
//! it is killed and reported with exit code `-1`; ssh's own failure
//! status (255) is a transport error rather than a command result.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use swarmgrid_core::config::RemoteConfig;
use swarmgrid_core::{ConfigError, Credentials, ExecResult, RemoteExecutionClient};
use swarmgrid_state::HostAddress;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};

/// Exit status ssh reserves for its own errors.
const SSH_TRANSPORT_FAILURE: i32 = 255;

pub struct SshExecutor {
    ssh_binary: String,
    scp_binary: String,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            scp_binary: "scp".to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.command_timeout()?)
            .with_binaries(config.ssh_binary.clone(), config.scp_binary.clone()))
    }

    pub fn with_binaries(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh_binary = ssh.into();
        self.scp_binary = scp.into();
        self
    }

    /// Spawn `program` and wait for it. `None` means it was killed at the timeout.
    async fn execute(&self, program: &str, args: &[String]) -> RemoteResult<Option<Output>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RemoteError::Spawn {
                program: program.to_string(),
                source,
            })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map(Some).map_err(|source| RemoteError::Spawn {
                program: program.to_string(),
                source,
            }),
            Err(_) => Ok(None),
        }
    }

    fn exec_result(&self, host: &HostAddress, output: Option<Output>) -> RemoteResult<ExecResult> {
        let Some(output) = output else {
            return Ok(ExecResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("timed out after {:?}", self.timeout),
            });
        };
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if exit_code == SSH_TRANSPORT_FAILURE {
            return Err(RemoteError::Transport {
                program: self.ssh_binary.clone(),
                host: host.public_ip.clone(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn connection_args(credentials: &Credentials, port_flag: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
    ];
    if let Some(identity) = &credentials.identity_file {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    if let Some(port) = credentials.port {
        args.push(port_flag.to_string());
        args.push(port.to_string());
    }
    args
}

pub(crate) fn ssh_args(
    host: &HostAddress,
    credentials: &Credentials,
    command: &str,
    wait: bool,
) -> Vec<String> {
    let mut args = connection_args(credentials, "-p");
    args.push(format!("{}@{}", host.username, host.public_ip));
    if wait {
        args.push(command.to_string());
    } else {
        args.push(format!("nohup sh -c {} > /dev/null 2>&1 &", shell_quote(command)));
    }
    args
}

pub(crate) fn scp_args(
    host: &HostAddress,
    credentials: &Credentials,
    local: &Path,
    remote: &str,
) -> Vec<String> {
    let mut args = connection_args(credentials, "-P");
    args.push(local.display().to_string());
    args.push(format!("{}@{}:{remote}", host.username, host.public_ip));
    args
}

#[async_trait]
impl RemoteExecutionClient for SshExecutor {
    async fn run(
        &self,
        host: &HostAddress,
        credentials: &Credentials,
        command: &str,
        wait: bool,
    ) -> anyhow::Result<ExecResult> {
        debug!(host = %host, wait, command, "running remote command");
        let output = self
            .execute(&self.ssh_binary, &ssh_args(host, credentials, command, wait))
            .await?;
        let result = self.exec_result(host, output)?;
        if result.exit_code == -1 {
            warn!(host = %host, command, timeout_ms = self.timeout.as_millis() as u64, "remote command timed out");
        }
        Ok(result)
    }

    async fn upload(
        &self,
        host: &HostAddress,
        credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> anyhow::Result<()> {
        debug!(host = %host, local = %local.display(), remote, "uploading file");
        let output = self
            .execute(&self.scp_binary, &scp_args(host, credentials, local, remote))
            .await?;
        let stderr = match output {
            Some(output) if output.status.success() => return Ok(()),
            Some(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
            None => format!("timed out after {:?}", self.timeout),
        };
        Err(RemoteError::Transport {
            program: self.scp_binary.clone(),
            host: host.public_ip.clone(),
            stderr,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn host() -> HostAddress {
        HostAddress::new("ubuntu", "203.0.113.7")
    }

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("echo hi"), "'echo hi'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn ssh_args_carry_credentials_and_target() {
        let credentials = Credentials {
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
            port: Some(2222),
        };
        let args = ssh_args(&host(), &credentials, "docker ps", true);
        let joined = args.join(" ");
        assert!(joined.contains("BatchMode=yes"));
        assert!(joined.contains("-i /keys/id_ed25519"));
        assert!(joined.contains("-p 2222"));
        assert_eq!(args[args.len() - 2], "ubuntu@203.0.113.7");
        assert_eq!(args[args.len() - 1], "docker ps");
    }

    #[test]
    fn detached_commands_are_wrapped_in_nohup() {
        let args = ssh_args(&host(), &Credentials::default(), "sleep 60", false);
        assert_eq!(
            args.last().unwrap(),
            "nohup sh -c 'sleep 60' > /dev/null 2>&1 &"
        );
    }

    #[test]
    fn scp_uses_upper_case_port_flag() {
        let credentials = Credentials {
            identity_file: None,
            port: Some(2222),
        };
        let args = scp_args(&host(), &credentials, Path::new("/tmp/a.sh"), "/opt/a.sh");
        let joined = args.join(" ");
        assert!(joined.contains("-P 2222"));
        assert!(joined.ends_with("/tmp/a.sh ubuntu@203.0.113.7:/opt/a.sh"));
    }

    #[tokio::test]
    async fn exit_codes_pass_through() {
        let executor = SshExecutor::new(Duration::from_secs(5));
        let output = executor
            .execute("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .await
            .unwrap();
        let result = executor.exec_result(&host(), output).unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.success());
    }

    #[tokio::test]
    async fn ssh_failure_status_is_a_transport_error() {
        let executor = SshExecutor::new(Duration::from_secs(5));
        let output = executor
            .execute("sh", &["-c".to_string(), "echo refused >&2; exit 255".to_string()])
            .await
            .unwrap();
        let err = executor.exec_result(&host(), output).unwrap_err();
        assert!(matches!(err, RemoteError::Transport { ref stderr, .. } if stderr == "refused"));
    }

    #[tokio::test]
    async fn overrunning_commands_are_killed_at_the_timeout() {
        let executor = SshExecutor::new(Duration::from_millis(100));
        let started = Instant::now();
        let output = executor
            .execute("sleep", &["5".to_string()])
            .await
            .unwrap();
        assert!(output.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));

        let result = executor.exec_result(&host(), output).unwrap();
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let executor = SshExecutor::new(Duration::from_secs(1))
            .with_binaries("/nonexistent/ssh", "/nonexistent/scp");
        let err = executor
            .run(&host(), &Credentials::default(), "true", true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ssh"));
    }

    #[tokio::test]
    async fn run_hands_the_command_to_the_ssh_binary() {
        // `echo` stands in for ssh and prints the argument vector it was given.
        let executor = SshExecutor::new(Duration::from_secs(5)).with_binaries("echo", "echo");
        let result = executor
            .run(&host(), &Credentials::default(), "docker info", true)
            .await
            .unwrap();
        assert!(result.success());
        assert!(result.stdout.trim_end().ends_with("ubuntu@203.0.113.7 docker info"));
    }
}
