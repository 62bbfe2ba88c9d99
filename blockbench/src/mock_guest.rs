//! Scripted guest channel for tests.
//!
//! No sockets, no ssh: commands are recorded and answered from a script,
//! and `fetch` materializes pre-configured log files into the destination
//! directory. Intended for CI and integration tests where a real guest is
//! unavailable.

use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::error::BenchError;
use crate::guest::{CmdOutput, GuestChannel};

/// In-process guest that answers every command from a script.
///
/// By default every command succeeds with empty output and `fetch` copies
/// nothing. Failure injection matches on a command substring.
#[derive(Debug, Default)]
pub struct MockGuest {
    responses: Vec<(String, CmdOutput)>,
    fetched_files: Vec<(String, String)>,
    commands: Mutex<Vec<String>>,
}

impl MockGuest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any command containing `needle` with the given output.
    #[must_use]
    pub fn respond_with(mut self, needle: impl Into<String>, output: CmdOutput) -> Self {
        self.responses.push((needle.into(), output));
        self
    }

    /// Fail any command containing `needle` with the given exit status and
    /// stderr.
    #[must_use]
    pub fn fail_on(self, needle: impl Into<String>, status: i32, stderr: impl Into<String>) -> Self {
        self.respond_with(
            needle,
            CmdOutput {
                status,
                stdout: String::new(),
                stderr: stderr.into(),
            },
        )
    }

    /// Materialize a file with the given name and contents on `fetch`.
    #[must_use]
    pub fn with_fetched_file(
        mut self,
        name: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        self.fetched_files.push((name.into(), contents.into()));
        self
    }

    /// Every command run against this guest, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("mock command log poisoned").clone()
    }
}

impl GuestChannel for MockGuest {
    async fn run(&self, command: &str) -> Result<CmdOutput, BenchError> {
        self.commands
            .lock()
            .expect("mock command log poisoned")
            .push(command.to_string());

        for (needle, output) in &self.responses {
            if command.contains(needle.as_str()) {
                debug!(command, needle = %needle, "mock guest scripted response");
                return Ok(output.clone());
            }
        }
        Ok(CmdOutput::default())
    }

    async fn fetch(&self, remote_glob: &str, local_dir: &Path) -> Result<(), BenchError> {
        debug!(remote_glob, local_dir = %local_dir.display(), "mock guest fetch");
        for (name, contents) in &self.fetched_files {
            std::fs::write(local_dir.join(name), contents)?;
        }
        Ok(())
    }
}
