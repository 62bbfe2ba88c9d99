//! Deterministic fio workload construction and execution.
//!
//! The driver pins every fio tunable explicitly; nothing is left to the
//! generator's defaults, so two runs with the same [`TrialParams`] issue
//! byte-identical invocations. Bandwidth logging is enabled at a fixed
//! cadence in fio's structured CSV format, one log per worker, which is
//! what makes the positional alignment in [`crate::aggregate`] sound.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::error::BenchError;
use crate::guest::GuestChannel;

/// fio access pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FioMode {
    Read,
    Write,
    #[value(name = "randread")]
    RandRead,
    #[value(name = "randwrite")]
    RandWrite,
}

impl fmt::Display for FioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FioMode::Read => "read",
            FioMode::Write => "write",
            FioMode::RandRead => "randread",
            FioMode::RandWrite => "randwrite",
        };
        f.write_str(name)
    }
}

/// Parameters of one trial. Immutable for the trial's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialParams {
    /// fio access pattern.
    pub mode: FioMode,
    /// I/O block size in bytes.
    pub block_size: u32,
    /// Size of the target block device in MiB.
    pub device_size_mib: u64,
    /// Worker count; one fio job pinned per guest vCPU.
    pub workers: u32,
    /// Ramp time excluded from measurement, in seconds.
    pub warmup_secs: u64,
    /// Total fio runtime in seconds (includes the warmup).
    pub runtime_secs: u64,
    /// Bandwidth log averaging window in milliseconds.
    pub log_interval_ms: u64,
}

impl TrialParams {
    pub fn new(mode: FioMode, block_size: u32, workers: u32) -> Self {
        Self {
            mode,
            block_size,
            device_size_mib: 2048,
            workers,
            warmup_secs: 10,
            runtime_secs: 30,
            log_interval_ms: 1000,
        }
    }

    #[must_use]
    pub fn with_device_size_mib(mut self, mib: u64) -> Self {
        self.device_size_mib = mib;
        self
    }

    #[must_use]
    pub fn with_warmup_secs(mut self, secs: u64) -> Self {
        self.warmup_secs = secs;
        self
    }

    #[must_use]
    pub fn with_runtime_secs(mut self, secs: u64) -> Self {
        self.runtime_secs = secs;
        self
    }

    #[must_use]
    pub fn with_log_interval_ms(mut self, ms: u64) -> Self {
        self.log_interval_ms = ms;
        self
    }
}

/// One fully-specified fio invocation against a guest block device.
#[derive(Debug, Clone)]
pub struct FioJob {
    params: TrialParams,
    /// Target device path inside the guest, e.g. `/dev/vdb`.
    device_path: String,
}

impl FioJob {
    pub fn new(params: TrialParams, device_path: impl Into<String>) -> Self {
        Self {
            params,
            device_path: device_path.into(),
        }
    }

    pub fn params(&self) -> &TrialParams {
        &self.params
    }

    /// Run identifier, also the stem of the bandwidth log files.
    pub fn run_id(&self) -> String {
        format!("{}-{}", self.params.mode, self.params.block_size)
    }

    /// Bandwidth log prefix: fio names the per-worker logs
    /// `<run_id>_bw.<worker>.log`.
    pub fn log_prefix(&self) -> String {
        format!("{}_bw", self.run_id())
    }

    /// Build the fio command line with every tunable pinned.
    pub fn command(&self) -> String {
        let p = &self.params;
        // Affinity set sized to the worker count; split policy pins one
        // worker per slot so CPU attribution stays valid mid-run.
        let cpus_allowed = (0..p.workers)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let args = [
            format!("--name={}", self.run_id()),
            format!("--rw={}", p.mode),
            format!("--bs={}", p.block_size),
            format!("--filename={}", self.device_path),
            "--time_based=1".to_string(),
            format!("--size={}M", p.device_size_mib),
            "--direct=1".to_string(),
            "--ioengine=libaio".to_string(),
            "--iodepth=32".to_string(),
            format!("--ramp_time={}", p.warmup_secs),
            format!("--numjobs={}", p.workers),
            format!("--cpus_allowed={cpus_allowed}"),
            "--cpus_allowed_policy=split".to_string(),
            "--randrepeat=0".to_string(),
            format!("--runtime={}", p.runtime_secs),
            format!("--write_bw_log={}", self.run_id()),
            format!("--log_avg_msec={}", p.log_interval_ms),
            "--output-format=json+".to_string(),
        ];

        format!("fio {}", args.join(" "))
    }
}

/// Execute the workload and collect its log artifacts.
///
/// The local artifact directory is removed and recreated first, so a
/// stale log set from a prior trial can never be aggregated. The guest-side
/// logs are fetched into it and then deleted from the guest.
pub async fn run_workload<C: GuestChannel>(
    guest: &C,
    job: &FioJob,
    artifact_dir: &Path,
) -> Result<(), BenchError> {
    reset_artifact_dir(artifact_dir)?;

    let command = format!("cd /tmp; {}", job.command());
    info!(run_id = %job.run_id(), %command, "starting workload");

    let out = guest.run(&command).await?;
    if !out.clean() {
        return Err(BenchError::Workload {
            status: out.status,
            stderr: out.stderr,
        });
    }

    guest.fetch("/tmp/*.log", artifact_dir).await?;

    // Idempotent guest-side cleanup; stderr is not significant here, the
    // run itself has already been validated.
    let out = guest.run("rm /tmp/*.log").await?;
    if !out.success() {
        return Err(BenchError::Workload {
            status: out.status,
            stderr: out.stderr,
        });
    }

    debug!(artifact_dir = %artifact_dir.display(), "workload logs retrieved");
    Ok(())
}

/// Remove and recreate the artifact directory.
fn reset_artifact_dir(dir: &Path) -> Result<(), BenchError> {
    if dir.is_dir() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_guest::MockGuest;

    fn sample_params() -> TrialParams {
        TrialParams::new(FioMode::RandRead, 4096, 2)
    }

    #[test]
    fn command_pins_every_tunable() {
        let job = FioJob::new(sample_params(), "/dev/vdb");
        let cmd = job.command();

        for expected in [
            "fio ",
            "--name=randread-4096",
            "--rw=randread",
            "--bs=4096",
            "--filename=/dev/vdb",
            "--time_based=1",
            "--size=2048M",
            "--direct=1",
            "--ioengine=libaio",
            "--iodepth=32",
            "--ramp_time=10",
            "--numjobs=2",
            "--cpus_allowed=0,1",
            "--cpus_allowed_policy=split",
            "--randrepeat=0",
            "--runtime=30",
            "--write_bw_log=randread-4096",
            "--log_avg_msec=1000",
            "--output-format=json+",
        ] {
            assert!(cmd.contains(expected), "missing `{expected}` in `{cmd}`");
        }
    }

    #[test]
    fn command_is_deterministic_for_equal_params() {
        let a = FioJob::new(sample_params(), "/dev/vdb").command();
        let b = FioJob::new(sample_params(), "/dev/vdb").command();
        assert_eq!(a, b);
    }

    #[test]
    fn log_prefix_matches_fio_naming() {
        let job = FioJob::new(
            TrialParams::new(FioMode::RandWrite, 8192, 1),
            "/dev/vdb",
        );
        assert_eq!(job.log_prefix(), "randwrite-8192_bw");
    }

    #[tokio::test]
    async fn artifact_dir_is_reset_before_invocation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = dir.path().join("fio_output");
        std::fs::create_dir_all(&artifacts).expect("mkdir");
        std::fs::write(artifacts.join("stale_bw.1.log"), "old data").expect("stale file");

        let guest = MockGuest::new().with_fetched_file("fresh_bw.1.log", "1000, 1, 0, 0\n");
        let job = FioJob::new(sample_params(), "/dev/vdb");

        run_workload(&guest, &job, &artifacts).await.expect("run");

        assert!(!artifacts.join("stale_bw.1.log").exists());
        assert!(artifacts.join("fresh_bw.1.log").exists());
    }

    #[tokio::test]
    async fn workload_failure_skips_retrieval_and_cleanup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = dir.path().join("fio_output");

        let guest = MockGuest::new().fail_on("fio", 1, "io_u error on file /dev/vdb");
        let job = FioJob::new(sample_params(), "/dev/vdb");

        let err = run_workload(&guest, &job, &artifacts)
            .await
            .expect_err("must fail");
        assert!(matches!(err, BenchError::Workload { status: 1, .. }));

        // Only the fio invocation ran; no rm followed.
        let commands = guest.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("fio"));
    }

    #[tokio::test]
    async fn guest_logs_are_removed_after_retrieval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guest = MockGuest::new();
        let job = FioJob::new(sample_params(), "/dev/vdb");

        run_workload(&guest, &job, dir.path()).await.expect("run");

        let commands = guest.commands();
        assert_eq!(commands.last().map(String::as_str), Some("rm /tmp/*.log"));
    }
}
