//! Remote command channel to the benchmark guest.
//!
//! The harness talks to the guest over two narrow seams: run a shell
//! command and collect its (status, stdout, stderr), and copy files
//! matching a glob back to a local directory. Production uses `ssh`/`scp`
//! subprocesses in BatchMode; tests substitute [`MockGuest`].
//!
//! [`MockGuest`]: crate::mock_guest::MockGuest

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BenchError;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    /// Process exit status; -1 if the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// Exit status zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Exit status zero AND empty stderr. Preparation and workload steps
    /// require this stronger condition: anything on stderr means the
    /// guest is not in the declared state.
    pub fn clean(&self) -> bool {
        self.success() && self.stderr.is_empty()
    }
}

/// Command channel into the guest.
pub trait GuestChannel {
    /// Run a shell command in the guest and wait for it to exit.
    fn run(&self, command: &str) -> impl Future<Output = Result<CmdOutput, BenchError>> + Send;

    /// Copy guest files matching `remote_glob` into `local_dir`.
    fn fetch(
        &self,
        remote_glob: &str,
        local_dir: &Path,
    ) -> impl Future<Output = Result<(), BenchError>> + Send;
}

/// SSH-backed guest channel.
///
/// Shells out to `ssh`/`scp` with BatchMode so a missing key fails fast
/// instead of prompting.
#[derive(Debug, Clone)]
pub struct SshGuest {
    /// SSH host string, e.g. `root@172.16.0.2`.
    host: String,
    /// Identity file, if the default agent/key lookup is not wanted.
    identity_file: Option<PathBuf>,
}

impl SshGuest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            identity_file: None,
        }
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(ref identity) = self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args
    }
}

impl GuestChannel for SshGuest {
    async fn run(&self, command: &str) -> Result<CmdOutput, BenchError> {
        debug!(host = %self.host, command, "running guest command");

        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args());
        cmd.arg(&self.host);
        cmd.arg(command);

        let output = cmd
            .output()
            .await
            .map_err(|e| BenchError::Transport(format!("failed to spawn ssh: {e}")))?;

        let result = CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(status = result.status, "guest command finished");
        Ok(result)
    }

    async fn fetch(&self, remote_glob: &str, local_dir: &Path) -> Result<(), BenchError> {
        info!(host = %self.host, remote_glob, local_dir = %local_dir.display(), "fetching guest files");

        let mut cmd = Command::new("scp");
        cmd.args(self.base_args());
        // scp needs the glob unexpanded on the remote side.
        cmd.arg(format!("{}:{}", self.host, remote_glob));
        cmd.arg(local_dir);

        let output = cmd
            .output()
            .await
            .map_err(|e| BenchError::Transport(format!("failed to spawn scp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BenchError::Transport(format!(
                "scp {}:{} failed: {}",
                self.host, remote_glob, stderr
            )));
        }
        Ok(())
    }
}
