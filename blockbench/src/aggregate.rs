//! Per-worker bandwidth log aggregation.
//!
//! fio writes one bandwidth log per worker, `<prefix>.<worker>.log`, as
//! CSV records `timestamp, value, direction, ...` at a fixed cadence. The
//! driver pins that cadence, so record k of every worker covers the same
//! time bucket; aggregation sums each bucket across workers per direction
//! and suppresses buckets whose aggregate is zero, so an inactive
//! direction emits no meaningless zero samples.
//!
//! Workers whose logs disagree on record count fail the trial outright
//! instead of being truncated to the shortest log; see DESIGN.md.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::error::BenchError;

/// I/O direction as encoded in fio bandwidth logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// One aggregated, time-bucketed, direction-tagged throughput value.
///
/// Units are whatever the generator reported, nominally KiB/s; no
/// conversion happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthPoint {
    pub bucket: usize,
    pub direction: Direction,
    pub value: u64,
}

/// One parsed log record: bandwidth value and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    value: u64,
    direction: Direction,
}

/// Aggregate the per-worker logs `<prefix>.<i>.log` for i in 1..=workers.
pub fn aggregate_worker_logs(
    dir: &Path,
    prefix: &str,
    workers: u32,
) -> Result<Vec<BandwidthPoint>, BenchError> {
    let mut per_worker: Vec<Vec<Record>> = Vec::with_capacity(workers as usize);
    for worker in 1..=workers {
        let path = dir.join(format!("{prefix}.{worker}.log"));
        let records = parse_log(&path)?;
        if let Some(first) = per_worker.first()
            && records.len() != first.len()
        {
            return Err(BenchError::RecordCountMismatch {
                worker,
                expected: first.len(),
                got: records.len(),
            });
        }
        per_worker.push(records);
    }

    let buckets = per_worker.first().map_or(0, Vec::len);
    debug!(workers, buckets, "aggregating worker bandwidth logs");

    let mut points = Vec::new();
    for bucket in 0..buckets {
        let mut bw_read = 0u64;
        let mut bw_write = 0u64;
        for records in &per_worker {
            let record = records[bucket];
            match record.direction {
                Direction::Read => bw_read += record.value,
                Direction::Write => bw_write += record.value,
            }
        }
        if bw_read > 0 {
            points.push(BandwidthPoint {
                bucket,
                direction: Direction::Read,
                value: bw_read,
            });
        }
        if bw_write > 0 {
            points.push(BandwidthPoint {
                bucket,
                direction: Direction::Write,
                value: bw_write,
            });
        }
    }
    Ok(points)
}

/// Parse one worker's bandwidth log.
fn parse_log(path: &Path) -> Result<Vec<Record>, BenchError> {
    let contents = std::fs::read_to_string(path)?;

    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = line.splitn(4, ',').collect();
        if fields.len() < 3 {
            return Err(BenchError::MalformedRecord {
                file: path.to_path_buf(),
                line: line_no,
                reason: format!("expected at least 3 comma-separated fields, got {}", fields.len()),
            });
        }

        let value: u64 = fields[1].trim().parse().map_err(|_| BenchError::MalformedRecord {
            file: path.to_path_buf(),
            line: line_no,
            reason: format!("invalid bandwidth value: {}", fields[1].trim()),
        })?;

        let direction = match fields[2].trim() {
            "0" => Direction::Read,
            "1" => Direction::Write,
            other => {
                return Err(BenchError::BadDirection {
                    flag: other.to_string(),
                    file: path.to_path_buf(),
                    line: line_no,
                });
            }
        };

        records.push(Record { value, direction });
    }
    Ok(records)
}
