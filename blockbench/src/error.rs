//! Benchmark error classification.
//!
//! Every variant is fatal for the trial that raised it. A benchmark's
//! validity depends on running under the declared, unperturbed conditions,
//! so nothing here carries retry semantics: the first failure aborts the
//! trial and surfaces the captured exit status and stderr to the operator.

use std::path::PathBuf;

/// Errors that can occur while preparing, running, or reducing a trial.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// A cache-flush or scheduler-bypass command failed. The system is in
    /// an unknown caching state and the trial must not proceed.
    #[error("preparation command `{command}` failed (exit {status}): {stderr}")]
    Prepare {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The workload generator exited non-zero or wrote to stderr. A
    /// malformed run is unusable data and must not be averaged in.
    #[error("workload invocation failed (exit {status}): {stderr}")]
    Workload { status: i32, stderr: String },

    /// The remote channel itself failed (ssh/scp could not be spawned or
    /// the transfer did not complete).
    #[error("guest channel failure: {0}")]
    Transport(String),

    /// A bandwidth log line did not have the expected
    /// `timestamp, value, direction, ...` shape.
    #[error("malformed bandwidth record in {file} line {line}: {reason}")]
    MalformedRecord {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    /// A direction flag outside {0, 1}. Silently dropping the line would
    /// corrupt the aggregate, so this raises instead.
    #[error("unknown direction flag `{flag}` in {file} line {line}")]
    BadDirection {
        flag: String,
        file: PathBuf,
        line: usize,
    },

    /// Worker logs disagree on record count. The driver pins the logging
    /// cadence, so a mismatch means the run is corrupt.
    #[error(
        "worker {worker} logged {got} records where {expected} were expected; \
         refusing to aggregate a truncated run"
    )]
    RecordCountMismatch {
        worker: u32,
        expected: usize,
        got: usize,
    },

    /// The CPU sampler could not read or parse the monitored process's
    /// /proc entries.
    #[error("cpu sampler failed for pid {pid}: {reason}")]
    Sampler { pid: u32, reason: String },

    /// Local filesystem failure (artifact directory reset, log reads).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
