//! Environment preparation for one trial.
//!
//! Each trial must start from a cold, comparable I/O state: the guest's
//! I/O scheduler must not reorder requests on the target device, and
//! neither guest nor host may serve the workload from warm page caches.
//! Every step is single-shot; a failure aborts the trial, because a warm
//! cache silently invalidates all later bandwidth numbers.

use tokio::process::Command;
use tracing::info;

use crate::error::BenchError;
use crate::guest::GuestChannel;

/// Runs the cache-flush and scheduler-bypass steps, in order.
#[derive(Debug, Clone)]
pub struct Preparer {
    /// Device name inside the guest, e.g. `vdb`.
    device: String,
    /// Whether to also flush the host page cache. Requires root on the
    /// host; unprivileged runs and tests disable it.
    flush_host: bool,
}

impl Preparer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            flush_host: true,
        }
    }

    #[must_use]
    pub fn flush_host(mut self, flush: bool) -> Self {
        self.flush_host = flush;
        self
    }

    /// Prepare guest and host for a repeatable measurement.
    ///
    /// Order matters: scheduler bypass first, then guest write-back and
    /// cache invalidation, then the same on the host.
    pub async fn run<C: GuestChannel>(&self, guest: &C) -> Result<(), BenchError> {
        info!(device = %self.device, flush_host = self.flush_host, "preparing system under test");

        let scheduler = format!("echo 'none' > /sys/block/{}/queue/scheduler", self.device);
        run_guest_step(guest, &scheduler).await?;

        // Flush all guest cached data to the host, then drop guest FS caches.
        run_guest_step(guest, "sync").await?;
        run_guest_step(guest, "echo 3 > /proc/sys/vm/drop_caches").await?;

        // Same on the host, so the emulated device is not served from the
        // host page cache either.
        if self.flush_host {
            run_host_step("sync").await?;
            run_host_step("echo 3 > /proc/sys/vm/drop_caches").await?;
        }

        Ok(())
    }
}

async fn run_guest_step<C: GuestChannel>(guest: &C, command: &str) -> Result<(), BenchError> {
    let out = guest.run(command).await?;
    if !out.clean() {
        return Err(BenchError::Prepare {
            command: command.to_string(),
            status: out.status,
            stderr: out.stderr,
        });
    }
    Ok(())
}

async fn run_host_step(command: &str) -> Result<(), BenchError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| BenchError::Transport(format!("failed to spawn host command: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() || !stderr.is_empty() {
        return Err(BenchError::Prepare {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr,
        });
    }
    Ok(())
}
