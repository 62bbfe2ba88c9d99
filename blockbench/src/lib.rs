//! Benchmark harness for the block-device emulation path of a virtual
//! machine monitor.
//!
//! The harness prepares guest and host for a repeatable measurement,
//! drives a deterministic fio workload against an emulated block device
//! inside the guest, concurrently samples the monitor process's CPU
//! utilization over the steady-state window, and aggregates the
//! per-worker bandwidth logs into summary metrics.
//!
//! Module map:
//! - [`guest`]: remote command/file channel into the guest (ssh/scp)
//! - [`mock_guest`]: scripted channel for tests
//! - [`prepare`]: cache-flush and scheduler-bypass steps
//! - [`workload`]: fio invocation construction and execution
//! - [`cpu`]: per-thread-group CPU utilization sampling
//! - [`aggregate`]: per-worker bandwidth log aggregation
//! - [`metrics`]: metrics sink seam
//! - [`trial`]: end-to-end orchestration

pub mod aggregate;
pub mod cpu;
pub mod error;
pub mod guest;
pub mod logging;
pub mod metrics;
pub mod mock_guest;
pub mod prepare;
pub mod trial;
pub mod workload;

pub use error::BenchError;
pub use trial::{Trial, TrialReport};
pub use workload::{FioMode, TrialParams};
