//! Trial orchestration.
//!
//! Control flow per trial: prepare the system under test, then run the
//! workload and the CPU sampler concurrently, join the sampler strictly
//! after the workload command has returned, aggregate the log artifacts,
//! and emit the metrics. The two concurrent tasks share no mutable state;
//! the sampler gets its own copy of the process handle and timing bounds.
//! Every phase is single-shot and the first failure aborts the trial
//! before any metric is emitted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

use crate::aggregate::{self, BandwidthPoint, Direction};
use crate::cpu::{self, CpuSeries, MonitoredProcess};
use crate::error::BenchError;
use crate::guest::GuestChannel;
use crate::metrics::MetricsSink;
use crate::prepare::Preparer;
use crate::workload::{self, FioJob, TrialParams};

/// One complete benchmark execution under one fixed parameter set.
#[derive(Debug, Clone)]
pub struct Trial {
    params: TrialParams,
    /// Device name inside the guest, e.g. `vdb`; the workload targets
    /// `/dev/<name>`.
    device: String,
    /// Local trial-scoped directory for retrieved log artifacts.
    artifact_dir: PathBuf,
    flush_host: bool,
}

/// Everything a trial produced, for report output.
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub run_id: String,
    pub params: TrialParams,
    pub bandwidth: Vec<BandwidthPoint>,
    pub cpu: CpuSeries,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl Trial {
    pub fn new(params: TrialParams, device: impl Into<String>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            params,
            device: device.into(),
            artifact_dir: artifact_dir.into(),
            flush_host: true,
        }
    }

    /// Skip the host-side cache flush (unprivileged environments).
    #[must_use]
    pub fn flush_host(mut self, flush: bool) -> Self {
        self.flush_host = flush;
        self
    }

    fn dimensions(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("performance_test".to_string(), "block".to_string()),
            ("fio_mode".to_string(), self.params.mode.to_string()),
            (
                "fio_block_size".to_string(),
                self.params.block_size.to_string(),
            ),
            ("workers".to_string(), self.params.workers.to_string()),
        ])
    }

    /// Run the trial end to end and emit its metrics into `sink`.
    pub async fn run<C, M>(
        &self,
        guest: &C,
        process: &MonitoredProcess,
        sink: &mut M,
    ) -> Result<TrialReport, BenchError>
    where
        C: GuestChannel,
        M: MetricsSink,
    {
        let started = Instant::now();
        let job = FioJob::new(self.params.clone(), format!("/dev/{}", self.device));
        info!(run_id = %job.run_id(), device = %self.device, "trial started");

        Preparer::new(self.device.clone())
            .flush_host(self.flush_host)
            .run(guest)
            .await?;

        // The sampler polls on its own thread for the full declared
        // runtime while this task blocks on the remote fio command.
        let sampler_process = process.clone();
        let runtime = Duration::from_secs(self.params.runtime_secs);
        let warmup = Duration::from_secs(self.params.warmup_secs);
        let cadence = Duration::from_millis(self.params.log_interval_ms);
        let sampler = tokio::task::spawn_blocking(move || {
            cpu::sample_process(&sampler_process, runtime, warmup, cadence)
        });

        workload::run_workload(guest, &job, &self.artifact_dir).await?;

        // Joined only after the workload has finished, so the steady-state
        // window is fully covered.
        let cpu_series = sampler.await.map_err(|e| BenchError::Sampler {
            pid: process.pid(),
            reason: format!("sampler task failed: {e}"),
        })??;

        let bandwidth =
            aggregate::aggregate_worker_logs(&self.artifact_dir, &job.log_prefix(), self.params.workers)?;

        sink.set_dimensions(self.dimensions());
        for point in &bandwidth {
            let name = match point.direction {
                Direction::Read => "bw_read",
                Direction::Write => "bw_write",
            };
            sink.put_metric(name, point.value as f64, "Kilobytes/Second");
        }
        for (group, samples) in &cpu_series {
            let name = format!("cpu_utilization_{group}");
            for sample in samples {
                sink.put_metric(&name, *sample, "Percent");
            }
        }

        let report = TrialReport {
            run_id: job.run_id(),
            params: self.params.clone(),
            bandwidth,
            cpu: cpu_series,
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        };
        info!(
            run_id = %report.run_id,
            bandwidth_points = report.bandwidth.len(),
            duration_ms = report.duration_ms,
            "trial finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingSink;
    use crate::mock_guest::MockGuest;

    fn fast_params() -> TrialParams {
        TrialParams::new(crate::workload::FioMode::RandRead, 4096, 2)
            .with_runtime_secs(1)
            .with_warmup_secs(0)
            .with_log_interval_ms(250)
    }

    fn trial(dir: &std::path::Path) -> Trial {
        Trial::new(fast_params(), "vdb", dir.join("fio_output")).flush_host(false)
    }

    fn self_process() -> MonitoredProcess {
        MonitoredProcess::new(std::process::id()).with_group("all", "")
    }

    #[tokio::test]
    async fn preparation_failure_emits_no_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guest = MockGuest::new().fail_on("drop_caches", 1, "permission denied");
        let mut sink = RecordingSink::new();

        let err = trial(dir.path())
            .run(&guest, &self_process(), &mut sink)
            .await
            .expect_err("must fail");

        assert!(matches!(err, BenchError::Prepare { .. }));
        assert!(sink.metrics.is_empty());
        assert!(sink.dimensions.is_empty());
    }

    #[tokio::test]
    async fn workload_failure_emits_no_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let guest = MockGuest::new().fail_on("fio", 1, "device busy");
        let mut sink = RecordingSink::new();

        let err = trial(dir.path())
            .run(&guest, &self_process(), &mut sink)
            .await
            .expect_err("must fail");

        assert!(matches!(err, BenchError::Workload { .. }));
        assert!(sink.metrics.is_empty());
    }

    #[tokio::test]
    async fn aggregation_failure_emits_no_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Direction flag 5 is a defect; the trial must fail after the
        // workload, before any emission.
        let guest = MockGuest::new()
            .with_fetched_file("randread-4096_bw.1.log", "1000, 100, 5, 4096\n")
            .with_fetched_file("randread-4096_bw.2.log", "1000, 100, 0, 4096\n");
        let mut sink = RecordingSink::new();

        let err = trial(dir.path())
            .run(&guest, &self_process(), &mut sink)
            .await
            .expect_err("must fail");

        assert!(matches!(err, BenchError::BadDirection { .. }));
        assert!(sink.metrics.is_empty());
    }
}
